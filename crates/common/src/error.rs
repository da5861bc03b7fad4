use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogwardenError {
    /// Negative capacity, window or cooldown, or an inconsistent rule list.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("audit write failed: {0}")]
    AuditWrite(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type LogwardenResult<T> = Result<T, LogwardenError>;
