use std::sync::Arc;

use chrono::NaiveDateTime;
use logwarden_ban::BanRegistry;
use logwarden_common::Event;
use logwarden_rate_limit::{Breach, RuleSet};
use serde::Serialize;
use tracing::{debug, warn};

/// How often a replaying evaluator hands control back to the runtime.
const YIELD_EVERY: usize = 256;

/// Result of replaying one key's events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyOutcome {
    pub key: String,
    pub events: usize,
    /// Events dropped because their timestamp went backwards.
    pub out_of_order: usize,
    /// Rules that placed a ban, in the order the bans happened.
    pub bans: Vec<String>,
}

/// Drives the ban state machine for a single key.
///
/// Events must arrive in non-decreasing timestamp order; the window count
/// relies on it. An event older than its predecessor is logged and dropped.
/// While the key is banned, events keep being reserved into the rule windows
/// but breaches do not produce new bans. Once the ban is lifted, the next
/// breaching event bans the key again.
pub struct KeyEvaluator {
    key: String,
    rules: RuleSet,
    registry: Arc<BanRegistry>,
    last_seen: Option<NaiveDateTime>,
    outcome: KeyOutcome,
}

impl KeyEvaluator {
    pub fn new(key: impl Into<String>, rules: RuleSet, registry: Arc<BanRegistry>) -> Self {
        let key = key.into();
        Self {
            outcome: KeyOutcome {
                key: key.clone(),
                ..KeyOutcome::default()
            },
            key,
            rules,
            registry,
            last_seen: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Feed one event. Returns the breach that placed a ban, if any.
    ///
    /// Must be called from within a Tokio runtime: a ban schedules its unban
    /// as a separate task.
    pub fn observe(&mut self, event: &Event) -> Option<Breach> {
        if event.key != self.key {
            warn!(key = %self.key, event_key = %event.key, "ignoring event for another key");
            return None;
        }
        if let Some(last) = self.last_seen {
            if event.timestamp < last {
                warn!(
                    key = %self.key,
                    timestamp = %event.timestamp,
                    previous = %last,
                    "skipping out-of-order event"
                );
                self.outcome.out_of_order += 1;
                return None;
            }
        }
        self.last_seen = Some(event.timestamp);
        self.outcome.events += 1;

        let breach = self.rules.record(event)?;
        if !self.registry.try_ban(&self.key, &breach.rule, breach.cooldown) {
            debug!(key = %self.key, rule = %breach.rule, "already banned, breach suppressed");
            return None;
        }
        self.outcome.bans.push(breach.rule.clone());
        Some(breach)
    }

    /// Replay `events` in order and report what happened.
    pub async fn run(mut self, events: Vec<Event>) -> KeyOutcome {
        for (i, event) in events.iter().enumerate() {
            self.observe(event);
            if (i + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        debug!(
            key = %self.key,
            events = self.outcome.events,
            bans = self.outcome.bans.len(),
            "key evaluation finished"
        );
        self.outcome
    }

    pub fn outcome(&self) -> &KeyOutcome {
        &self.outcome
    }
}
