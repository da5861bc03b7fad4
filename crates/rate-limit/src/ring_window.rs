use chrono::{NaiveDateTime, TimeDelta};
use logwarden_common::{LogwardenError, LogwardenResult};
use std::sync::{Mutex, MutexGuard};

/// Ring state. Only ever touched through the lock in [`RateWindow`].
#[derive(Debug)]
struct Ring {
    initialized: bool,
    window: TimeDelta,
    slots: Vec<Option<NaiveDateTime>>,
    /// Next slot to overwrite: the oldest entry once the ring is full, one
    /// past the newest entry otherwise.
    cursor: usize,
}

impl Default for Ring {
    fn default() -> Self {
        Self {
            initialized: false,
            window: TimeDelta::zero(),
            slots: Vec::new(),
            cursor: 0,
        }
    }
}

impl Ring {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn advance(&mut self) {
        self.cursor += 1;
        if self.cursor >= self.slots.len() {
            self.cursor = 0;
        }
    }

    fn reserve(&mut self, timestamp: NaiveDateTime) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.cursor] = Some(timestamp);
        self.advance();
    }

    /// Walks backwards from the newest entry and stops at the first one that
    /// is at or before `reference - window`. Entries are reserved in
    /// chronological order, so everything older is out of the window too.
    ///
    /// TODO: the slots between cursor and cursor-1 are sorted, so a binary
    /// search modulo the ring length would make this O(log n).
    fn count(&self, reference: NaiveDateTime) -> usize {
        let capacity = self.capacity();
        // `None` when the window reaches back past the earliest representable time.
        let start = reference.checked_sub_signed(self.window);

        let mut in_window = 0;
        for offset in 0..capacity {
            let i = (self.cursor + capacity - offset - 1) % capacity;
            match self.slots[i] {
                None => break,
                Some(ts) if start.is_some_and(|start| ts <= start) => break,
                Some(ts) if ts > reference => continue,
                Some(_) => in_window += 1,
            }
        }
        in_window
    }

    /// Recorded timestamps, oldest first.
    fn chronological(&self) -> Vec<NaiveDateTime> {
        let capacity = self.capacity();
        (0..capacity)
            .filter_map(|offset| self.slots[(self.cursor + offset) % capacity])
            .collect()
    }

    fn resize(&mut self, capacity: usize) {
        if capacity == self.capacity() {
            return;
        }

        // Oldest entries are forgotten first when shrinking.
        let mut kept = self.chronological();
        if kept.len() > capacity {
            kept.drain(..kept.len() - capacity);
        }

        let mut slots = vec![None; capacity];
        for (slot, ts) in slots.iter_mut().zip(&kept) {
            *slot = Some(*ts);
        }

        self.cursor = if capacity == 0 { 0 } else { kept.len() % capacity };
        self.slots = slots;
    }
}

/// Sliding-window event counter backed by a fixed-size ring of timestamps.
///
/// The ring holds the `capacity` most recently reserved timestamps. Counting
/// is done against an explicit reference time, so the same window can be
/// driven by wall-clock time or by timestamps replayed from a log.
///
/// A window counts an entry `ts` as inside when
/// `reference - window < ts <= reference`.
///
/// All operations take `&self`; the ring sits behind a mutex so callers can
/// never mutate it without holding the lock.
#[derive(Debug, Default)]
pub struct RateWindow {
    ring: Mutex<Ring>,
}

impl RateWindow {
    /// Create an uninitialized window: capacity 0, zero-length window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and initialize a window in one step.
    pub fn with_limits(capacity: usize, window: TimeDelta) -> LogwardenResult<Self> {
        let rw = Self::new();
        rw.initialize(capacity, window)?;
        Ok(rw)
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().expect("rate window lock poisoned")
    }

    /// Set capacity and window length. Only the first call has an effect;
    /// later calls are no-ops. A negative window is rejected.
    pub fn initialize(&self, capacity: usize, window: TimeDelta) -> LogwardenResult<()> {
        check_window(window)?;

        let mut ring = self.lock();
        if ring.initialized {
            return Ok(());
        }
        ring.initialized = true;
        ring.window = window;
        ring.slots = vec![None; capacity];
        ring.cursor = 0;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Record `timestamp` at the cursor, overwriting the oldest entry once
    /// the ring is full. A zero-capacity window records nothing.
    pub fn reserve(&self, timestamp: NaiveDateTime) {
        self.lock().reserve(timestamp);
    }

    /// Number of recorded timestamps inside the window ending at `reference`.
    /// Never exceeds [`max_events`](Self::max_events).
    pub fn count(&self, reference: NaiveDateTime) -> usize {
        self.lock().count(reference)
    }

    /// Reserve `at` if the window has room for it.
    ///
    /// Returns `false`, without reserving, when the window already holds
    /// `max_events` entries newer than `at - window`.
    pub fn try_reserve(&self, at: NaiveDateTime) -> bool {
        let mut ring = self.lock();
        if ring.capacity() == 0 {
            return false;
        }
        let oldest = ring.slots[ring.cursor];
        let admissible = match (oldest, at.checked_sub_signed(ring.window)) {
            (None, _) => true,
            (Some(ts), Some(start)) => ts <= start,
            (Some(_), None) => false,
        };
        if admissible {
            ring.reserve(at);
        }
        admissible
    }

    /// Time from `at` until [`try_reserve`](Self::try_reserve) would succeed.
    /// `None` means the window never admits anything: capacity 0, or a window
    /// so long that the oldest entry never leaves it in representable time.
    pub fn retry_after(&self, at: NaiveDateTime) -> Option<TimeDelta> {
        let ring = self.lock();
        if ring.capacity() == 0 {
            return None;
        }
        match ring.slots[ring.cursor] {
            None => Some(TimeDelta::zero()),
            Some(oldest) => {
                let frees_at = oldest.checked_add_signed(ring.window)?;
                Some(frees_at.signed_duration_since(at).max(TimeDelta::zero()))
            }
        }
    }

    /// Maximum number of events the window holds.
    pub fn max_events(&self) -> usize {
        self.lock().capacity()
    }

    /// Change the capacity. Shrinking forgets the oldest entries; growing
    /// keeps every entry and adds empty slots.
    pub fn set_max_events(&self, capacity: usize) {
        self.lock().resize(capacity);
    }

    pub fn window(&self) -> TimeDelta {
        self.lock().window
    }

    pub fn set_window(&self, window: TimeDelta) -> LogwardenResult<()> {
        check_window(window)?;
        self.lock().window = window;
        Ok(())
    }

    /// Recorded timestamps, oldest first.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.lock().chronological()
    }

    /// Return to the uninitialized state so the next `initialize` applies.
    pub fn reset(&self) {
        *self.lock() = Ring::default();
    }
}

fn check_window(window: TimeDelta) -> LogwardenResult<()> {
    if window < TimeDelta::zero() {
        return Err(LogwardenError::InvalidConfiguration(format!(
            "window cannot be less than zero (got {window})"
        )));
    }
    Ok(())
}
