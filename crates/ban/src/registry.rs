use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditRecord, AuditSink};

/// Ban state of a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanState {
    Unbanned,
    Banned { reason: String, until: Instant },
}

/// Point-in-time view of a key's ban state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanRecord {
    pub key: String,
    pub banned: bool,
    /// Rule that caused the current ban; `None` while unbanned.
    pub reason: Option<String>,
}

#[derive(Debug)]
struct BanEntry {
    state: BanState,
    /// Bumped on every ban so a stale unban task cannot lift a newer ban.
    generation: u64,
}

impl Default for BanEntry {
    fn default() -> Self {
        Self {
            state: BanState::Unbanned,
            generation: 0,
        }
    }
}

/// Process-wide ban state plus the timers that lift bans.
///
/// Each key's state lives in a [`DashMap`] entry, so checking and setting a
/// ban is one atomic step per key. Every ban schedules its own unban task;
/// those tasks are tracked so callers can [`drain`](Self::drain) them, and
/// [`shutdown`](Self::shutdown) makes all of them fire immediately.
///
/// Unban tasks are owned by the runtime, not by whoever is draining: a
/// dropped `drain()` future never aborts them.
pub struct BanRegistry {
    entries: DashMap<String, BanEntry>,
    sink: Arc<dyn AuditSink>,
    unbans: TaskTracker,
    shutdown: watch::Sender<bool>,
}

impl BanRegistry {
    pub fn new(sink: Arc<dyn AuditSink>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            entries: DashMap::new(),
            sink,
            unbans: TaskTracker::new(),
            shutdown,
        })
    }

    pub fn is_banned(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| matches!(entry.state, BanState::Banned { .. }))
            .unwrap_or(false)
    }

    pub fn state(&self, key: &str) -> BanState {
        self.entries
            .get(key)
            .map(|entry| entry.state.clone())
            .unwrap_or(BanState::Unbanned)
    }

    pub fn record(&self, key: &str) -> BanRecord {
        let reason = match self.state(key) {
            BanState::Banned { reason, .. } => Some(reason),
            BanState::Unbanned => None,
        };
        BanRecord {
            key: key.to_string(),
            banned: reason.is_some(),
            reason,
        }
    }

    /// Snapshot of every key the registry has seen, sorted by key.
    pub fn records(&self) -> Vec<BanRecord> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.iter().map(|key| self.record(key)).collect()
    }

    /// Ban `key` for `cooldown` unless it is already banned.
    ///
    /// Returns `true` if this call placed the ban. The BAN record is written
    /// to the audit sink and an unban is scheduled; both happen outside the
    /// key's map entry lock. Must be called from within a Tokio runtime.
    pub fn try_ban(self: &Arc<Self>, key: &str, reason: &str, cooldown: Duration) -> bool {
        let generation = {
            let mut entry = self.entries.entry(key.to_string()).or_default();
            if matches!(entry.state, BanState::Banned { .. }) {
                return false;
            }
            entry.generation += 1;
            entry.state = BanState::Banned {
                reason: reason.to_string(),
                until: Instant::now() + cooldown,
            };
            entry.generation
        };

        info!(key = %key, rule = %reason, cooldown_secs = cooldown.as_secs(), "banned");
        self.audit(AuditAction::Ban, key);
        self.schedule_unban(key, generation, cooldown);
        true
    }

    /// Lift a ban right away, whatever its remaining cooldown.
    ///
    /// Returns `false` if the key was not banned. The pending unban task for
    /// the lifted ban becomes a no-op.
    pub fn mark_unbanned(&self, key: &str) -> bool {
        let lifted = match self.entries.get_mut(key) {
            Some(mut entry) if matches!(entry.state, BanState::Banned { .. }) => {
                entry.state = BanState::Unbanned;
                entry.generation += 1;
                true
            }
            _ => false,
        };
        if lifted {
            info!(key = %key, "unbanned");
            self.audit(AuditAction::Unban, key);
        }
        lifted
    }

    fn schedule_unban(self: &Arc<Self>, key: &str, generation: u64, cooldown: Duration) {
        let registry = Arc::clone(self);
        let key = key.to_string();
        let mut shutdown = self.shutdown.subscribe();

        self.unbans.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(cooldown) => {}
                _ = shutdown.wait_for(|stopping| *stopping) => {
                    debug!(key = %key, "releasing ban early for shutdown");
                }
            }
            registry.release(&key, generation);
        });
    }

    fn release(&self, key: &str, generation: u64) {
        let lifted = match self.entries.get_mut(key) {
            Some(mut entry)
                if entry.generation == generation
                    && matches!(entry.state, BanState::Banned { .. }) =>
            {
                entry.state = BanState::Unbanned;
                true
            }
            _ => false,
        };
        if lifted {
            info!(key = %key, "cooldown elapsed, unbanned");
            self.audit(AuditAction::Unban, key);
        }
    }

    fn audit(&self, action: AuditAction, key: &str) {
        if let Err(e) = self.sink.record(&AuditRecord::now(action, key)) {
            warn!(key = %key, action = %action, error = %e, "audit write failed");
        }
    }

    /// Number of scheduled unbans that have not fired yet.
    pub fn pending_unbans(&self) -> usize {
        self.unbans.len()
    }

    /// Wait until every scheduled unban, including ones scheduled while
    /// draining, has completed.
    ///
    /// Cancel-safe: dropping the returned future leaves every unban task
    /// running, and a later `drain()` waits for them again.
    pub async fn drain(&self) {
        // The tracker stays closed; spawning still works on a closed tracker,
        // it only lets `wait` resolve once the set is empty.
        self.unbans.close();
        self.unbans.wait().await;
    }

    /// Make every pending unban fire now. Bans placed afterwards are lifted
    /// as soon as their unban task runs.
    pub fn shutdown(&self) {
        info!(pending = self.pending_unbans(), "releasing pending bans");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
