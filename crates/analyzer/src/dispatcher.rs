use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use logwarden_ban::BanRegistry;
use logwarden_common::{Event, LogwardenResult, RuleConfig, UnbanPolicy};
use logwarden_rate_limit::{RuleSet, WindowPool};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::evaluator::{KeyEvaluator, KeyOutcome};
use crate::log_parser;

/// A ban placed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanSummary {
    pub key: String,
    pub rule: String,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub keys: usize,
    pub events: usize,
    pub skipped_lines: usize,
    pub out_of_order: usize,
    pub bans: Vec<BanSummary>,
    /// Unbans still scheduled when the run returned. Always zero under
    /// [`UnbanPolicy::Wait`].
    pub pending_unbans: usize,
}

impl RunReport {
    fn add(&mut self, outcome: KeyOutcome) {
        self.keys += 1;
        self.events += outcome.events;
        self.out_of_order += outcome.out_of_order;
        self.bans.extend(outcome.bans.into_iter().map(|rule| BanSummary {
            key: outcome.key.clone(),
            rule,
        }));
    }
}

/// Runs one [`KeyEvaluator`] per key concurrently and waits for all of them.
///
/// Each key gets its own [`RuleSet`]; windows are never shared between keys.
/// The only shared state is the [`BanRegistry`].
pub struct Dispatcher {
    rules: Vec<RuleConfig>,
    registry: Arc<BanRegistry>,
    policy: UnbanPolicy,
    pool: Option<Arc<WindowPool>>,
}

impl Dispatcher {
    /// Fails with `InvalidConfiguration` if any rule is invalid, before any
    /// task is spawned.
    pub fn new(
        rules: Vec<RuleConfig>,
        registry: Arc<BanRegistry>,
        policy: UnbanPolicy,
    ) -> LogwardenResult<Self> {
        RuleSet::from_config(&rules)?;
        Ok(Self {
            rules,
            registry,
            policy,
            pool: None,
        })
    }

    /// Draw rule windows from `pool` instead of allocating them per key.
    pub fn with_pool(mut self, pool: Arc<WindowPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn registry(&self) -> &Arc<BanRegistry> {
        &self.registry
    }

    fn rule_set(&self) -> LogwardenResult<RuleSet> {
        match &self.pool {
            Some(pool) => RuleSet::from_pool(&self.rules, pool),
            None => RuleSet::from_config(&self.rules),
        }
    }

    /// Evaluate every key's events concurrently.
    ///
    /// Returns once all evaluators are done and, under
    /// [`UnbanPolicy::Wait`], once every unban they scheduled has fired.
    /// Must be called from within a Tokio runtime.
    pub async fn run(&self, events: BTreeMap<String, Vec<Event>>) -> LogwardenResult<RunReport> {
        let mut tasks = JoinSet::new();
        for (key, key_events) in events {
            let evaluator = KeyEvaluator::new(key, self.rule_set()?, Arc::clone(&self.registry));
            tasks.spawn(evaluator.run(key_events));
        }
        info!(keys = tasks.len(), "dispatched key evaluators");

        let mut report = RunReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(outcome) => report.add(outcome),
                Err(e) => error!(error = %e, "key evaluator failed"),
            }
        }
        report.bans.sort_by(|a, b| a.key.cmp(&b.key));

        if self.policy == UnbanPolicy::Wait {
            info!(
                pending = self.registry.pending_unbans(),
                "waiting for scheduled unbans"
            );
            self.registry.drain().await;
        }
        report.pending_unbans = self.registry.pending_unbans();

        info!(
            keys = report.keys,
            events = report.events,
            bans = report.bans.len(),
            pending_unbans = report.pending_unbans,
            "run complete"
        );
        Ok(report)
    }

    /// Parse the log at `path` and evaluate it.
    pub async fn run_file(&self, path: &Path) -> LogwardenResult<RunReport> {
        let parsed = log_parser::parse_file(path)?;
        let skipped = parsed.skipped_lines;
        let mut report = self.run(parsed.events).await?;
        report.skipped_lines = skipped;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use logwarden_ban::{AuditAction, MemoryAuditSink};
    use logwarden_common::LogwardenError;
    use std::time::Duration;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn burst_events(key: &str, n: i64) -> Vec<Event> {
        (0..n).map(|s| Event::new(key, at(s), "/")).collect()
    }

    #[test]
    fn rejects_invalid_rules_eagerly() {
        let sink = Arc::new(MemoryAuditSink::new());
        let result = Dispatcher::new(
            vec![RuleConfig::new("bad", 5, -1, None, 10)],
            BanRegistry::new(sink),
            UnbanPolicy::Wait,
        );
        assert!(matches!(result, Err(LogwardenError::InvalidConfiguration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_drains_unbans() {
        let sink = Arc::new(MemoryAuditSink::new());
        let registry = BanRegistry::new(sink.clone());
        let dispatcher = Dispatcher::new(
            vec![RuleConfig::new("burst", 5, 60, None, 600)],
            registry.clone(),
            UnbanPolicy::Wait,
        )
        .unwrap();

        let mut events = BTreeMap::new();
        events.insert("a".to_string(), burst_events("a", 10));
        events.insert("b".to_string(), burst_events("b", 3));

        let started = tokio::time::Instant::now();
        let report = dispatcher.run(events).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(600));
        assert_eq!(report.keys, 2);
        assert_eq!(report.events, 13);
        assert_eq!(
            report.bans,
            vec![BanSummary {
                key: "a".to_string(),
                rule: "burst".to_string(),
            }]
        );
        assert_eq!(report.pending_unbans, 0);
        assert!(!registry.is_banned("a"));
        assert_eq!(sink.count(AuditAction::Unban, "a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn detach_policy_returns_with_bans_pending() {
        let sink = Arc::new(MemoryAuditSink::new());
        let registry = BanRegistry::new(sink.clone());
        let dispatcher = Dispatcher::new(
            vec![RuleConfig::new("burst", 5, 60, None, 600)],
            registry.clone(),
            UnbanPolicy::Detach,
        )
        .unwrap();

        let mut events = BTreeMap::new();
        events.insert("a".to_string(), burst_events("a", 10));

        let report = dispatcher.run(events).await.unwrap();
        assert_eq!(report.pending_unbans, 1);
        assert!(registry.is_banned("a"));
        assert_eq!(sink.count(AuditAction::Unban, "a"), 0);

        registry.drain().await;
        assert!(!registry.is_banned("a"));
        assert_eq!(sink.count(AuditAction::Unban, "a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pooled_windows_are_recycled() {
        let sink = Arc::new(MemoryAuditSink::new());
        let pool = WindowPool::new(16);
        let dispatcher = Dispatcher::new(
            vec![
                RuleConfig::new("login", 2, 60, Some("/login"), 10),
                RuleConfig::new("burst", 5, 60, None, 10),
            ],
            BanRegistry::new(sink),
            UnbanPolicy::Wait,
        )
        .unwrap()
        .with_pool(pool.clone());

        for round in 0..3 {
            let mut events = BTreeMap::new();
            for k in 0..4 {
                let key = format!("key-{round}-{k}");
                events.insert(key.clone(), burst_events(&key, 4));
            }
            let report = dispatcher.run(events).await.unwrap();
            assert!(report.bans.is_empty());
        }
        assert_eq!(pool.idle(), 8);
    }
}
