use anyhow::Result;
use logwarden_common::AppConfig;
use std::path::PathBuf;
use tracing::info;

/// Configuration resolved from the command line.
pub struct CliConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl CliConfig {
    /// Load `path`; a non-empty `input_override` replaces the configured
    /// log file.
    pub fn load(path: &str, input_override: Option<String>) -> Result<Self> {
        info!(path = path, "loading configuration");
        let mut config = AppConfig::load(path)?;
        if let Some(input) = input_override.filter(|s| !s.is_empty()) {
            config.input = PathBuf::from(input);
        }
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logwarden.yaml");
        std::fs::write(&path, "input: from-file.log\n").unwrap();
        let path = path.to_string_lossy().to_string();

        let cli = CliConfig::load(&path, None).unwrap();
        assert_eq!(cli.config.input, PathBuf::from("from-file.log"));

        let cli = CliConfig::load(&path, Some("other.log".to_string())).unwrap();
        assert_eq!(cli.config.input, PathBuf::from("other.log"));
        assert_eq!(cli.config_path, PathBuf::from(&path));
    }

    #[test]
    fn invalid_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logwarden.yaml");
        std::fs::write(
            &path,
            "rules:\n  - name: x\n    max_events: -1\n    window_secs: 1\n    cooldown_secs: 1\n",
        )
        .unwrap();
        assert!(CliConfig::load(&path.to_string_lossy(), None).is_err());
    }
}
