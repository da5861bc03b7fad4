use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{LogwardenError, LogwardenResult};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_input")]
    pub input: PathBuf,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub unban: UnbanConfig,
    /// Rules in priority order, strictest first.
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            audit: AuditConfig::default(),
            unban: UnbanConfig::default(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbanConfig {
    #[serde(default = "default_unban_policy")]
    pub policy: UnbanPolicy,
}

impl Default for UnbanConfig {
    fn default() -> Self {
        Self {
            policy: default_unban_policy(),
        }
    }
}

/// What a batch run does with unbans still pending when evaluation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnbanPolicy {
    /// The run completes only once every scheduled unban has fired.
    Wait,
    /// The run completes as soon as evaluation does; unbans keep running.
    Detach,
}

/// A single rate rule.
///
/// Numeric fields are signed so that a negative value in the file surfaces
/// as `InvalidConfiguration` rather than as a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub max_events: i64,
    pub window_secs: i64,
    #[serde(default)]
    pub tag_filter: Option<String>,
    pub cooldown_secs: i64,
}

impl RuleConfig {
    pub fn new(
        name: impl Into<String>,
        max_events: i64,
        window_secs: i64,
        tag_filter: Option<&str>,
        cooldown_secs: i64,
    ) -> Self {
        Self {
            name: name.into(),
            max_events,
            window_secs,
            tag_filter: tag_filter.map(str::to_string),
            cooldown_secs,
        }
    }

    pub fn capacity(&self) -> LogwardenResult<usize> {
        usize::try_from(self.max_events).map_err(|_| {
            LogwardenError::InvalidConfiguration(format!(
                "rule '{}': max_events cannot be less than zero (got {})",
                self.name, self.max_events
            ))
        })
    }

    pub fn window(&self) -> LogwardenResult<TimeDelta> {
        if self.window_secs < 0 {
            return Err(LogwardenError::InvalidConfiguration(format!(
                "rule '{}': window_secs cannot be less than zero (got {})",
                self.name, self.window_secs
            )));
        }
        TimeDelta::try_seconds(self.window_secs).ok_or_else(|| {
            LogwardenError::InvalidConfiguration(format!(
                "rule '{}': window_secs out of range ({})",
                self.name, self.window_secs
            ))
        })
    }

    pub fn cooldown(&self) -> LogwardenResult<Duration> {
        u64::try_from(self.cooldown_secs)
            .map(Duration::from_secs)
            .map_err(|_| {
                LogwardenError::InvalidConfiguration(format!(
                    "rule '{}': cooldown_secs cannot be less than zero (got {})",
                    self.name, self.cooldown_secs
                ))
            })
    }

    pub fn validate(&self) -> LogwardenResult<()> {
        if self.name.trim().is_empty() {
            return Err(LogwardenError::InvalidConfiguration(
                "rule name must not be empty".to_string(),
            ));
        }
        self.capacity()?;
        self.window()?;
        self.cooldown()?;
        Ok(())
    }
}

// Default value helpers
fn default_input() -> PathBuf {
    PathBuf::from("access.log")
}
fn default_audit_path() -> PathBuf {
    PathBuf::from("ban.csv")
}
fn default_unban_policy() -> UnbanPolicy {
    UnbanPolicy::Wait
}
fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new("login", 20, 10 * 60, Some("/login"), 120 * 60),
        RuleConfig::new("burst", 40, 60, None, 10 * 60),
        RuleConfig::new("sustained", 100, 10 * 60, None, 60 * 60),
    ]
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> LogwardenResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        debug!(path = %path.as_ref().display(), rules = config.rules.len(), "configuration loaded");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> LogwardenResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> LogwardenResult<()> {
        if self.rules.is_empty() {
            return Err(LogwardenError::InvalidConfiguration(
                "at least one rule must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.name.as_str()) {
                return Err(LogwardenError::InvalidConfiguration(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
        }

        Ok(())
    }
}
