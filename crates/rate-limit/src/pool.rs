use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::ring_window::RateWindow;

/// Reuse pool for [`RateWindow`] instances.
///
/// Windows leave the pool through [`WindowPool::acquire`] as a
/// [`PooledWindow`] guard. When the guard drops, the window is reset to the
/// uninitialized state before it is made available again, so a recycled
/// window never carries timestamps or limits from its previous owner.
#[derive(Debug)]
pub struct WindowPool {
    idle: Mutex<Vec<RateWindow>>,
    max_idle: usize,
}

impl WindowPool {
    /// Create a pool that keeps at most `max_idle` windows around.
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        })
    }

    /// Take a window out of the pool, allocating one if none is idle.
    /// The window is always uninitialized.
    pub fn acquire(self: &Arc<Self>) -> PooledWindow {
        let window = self
            .idle
            .lock()
            .expect("window pool lock poisoned")
            .pop()
            .unwrap_or_default();

        PooledWindow {
            window: Some(window),
            pool: Some(Arc::clone(self)),
        }
    }

    /// Number of idle windows waiting to be reused.
    pub fn idle(&self) -> usize {
        self.idle.lock().expect("window pool lock poisoned").len()
    }

    fn release(&self, window: RateWindow) {
        window.reset();
        let mut idle = self.idle.lock().expect("window pool lock poisoned");
        if idle.len() < self.max_idle {
            idle.push(window);
        }
    }
}

/// A [`RateWindow`] on loan from a [`WindowPool`], or a standalone one.
#[derive(Debug)]
pub struct PooledWindow {
    window: Option<RateWindow>,
    pool: Option<Arc<WindowPool>>,
}

impl PooledWindow {
    /// Wrap a window that does not belong to any pool.
    pub fn unpooled(window: RateWindow) -> Self {
        Self {
            window: Some(window),
            pool: None,
        }
    }
}

impl Deref for PooledWindow {
    type Target = RateWindow;

    fn deref(&self) -> &RateWindow {
        self.window
            .as_ref()
            .expect("pooled window accessed after release")
    }
}

impl Drop for PooledWindow {
    fn drop(&mut self) {
        if let (Some(window), Some(pool)) = (self.window.take(), self.pool.as_ref()) {
            pool.release(window);
        }
    }
}
