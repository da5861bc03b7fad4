use std::sync::Arc;
use std::time::Duration;

use logwarden_common::{Event, LogwardenResult, RuleConfig};
use tracing::trace;

use crate::pool::{PooledWindow, WindowPool};
use crate::ring_window::RateWindow;

/// A rate rule: one sliding window plus the events it applies to.
#[derive(Debug)]
pub struct Rule {
    name: String,
    window: PooledWindow,
    tag_filter: Option<String>,
    cooldown: Duration,
}

impl Rule {
    fn build(config: &RuleConfig, window: PooledWindow) -> LogwardenResult<Self> {
        config.validate()?;
        window.initialize(config.capacity()?, config.window()?)?;
        Ok(Self {
            name: config.name.clone(),
            window,
            tag_filter: config.tag_filter.clone(),
            cooldown: config.cooldown()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }

    /// Unfiltered rules see every event; filtered rules only exact tag matches.
    pub fn matches(&self, event: &Event) -> bool {
        self.tag_filter
            .as_deref()
            .map_or(true, |filter| filter == event.tag)
    }

    fn is_breached(&self, event: &Event) -> Option<Breach> {
        let max_events = self.window.max_events();
        let count = self.window.count(event.timestamp);
        if count < max_events {
            return None;
        }
        trace!(rule = %self.name, key = %event.key, count, max_events, "rule window full");
        Some(Breach {
            rule: self.name.clone(),
            cooldown: self.cooldown,
            count,
            max_events,
        })
    }
}

/// A rule whose window reached its maximum at some event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breach {
    pub rule: String,
    pub cooldown: Duration,
    pub count: usize,
    pub max_events: usize,
}

/// Rules for a single key, kept in priority order (strictest first).
///
/// Every `RuleSet` owns its windows; nothing is shared between keys.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set with freshly allocated windows.
    pub fn from_config(rules: &[RuleConfig]) -> LogwardenResult<Self> {
        rules
            .iter()
            .map(|config| Rule::build(config, PooledWindow::unpooled(RateWindow::new())))
            .collect::<LogwardenResult<Vec<_>>>()
            .map(|rules| Self { rules })
    }

    /// Build a rule set whose windows are leased from `pool`. They go back
    /// to the pool when the rule set is dropped.
    pub fn from_pool(rules: &[RuleConfig], pool: &Arc<WindowPool>) -> LogwardenResult<Self> {
        rules
            .iter()
            .map(|config| Rule::build(config, pool.acquire()))
            .collect::<LogwardenResult<Vec<_>>>()
            .map(|rules| Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Reserve `event` into every rule it matches, then report the first
    /// rule, in priority order, whose window is full at the event's time.
    pub fn record(&self, event: &Event) -> Option<Breach> {
        for rule in &self.rules {
            if rule.matches(event) {
                rule.window.reserve(event.timestamp);
            }
        }
        self.rules.iter().find_map(|rule| rule.is_breached(event))
    }
}
