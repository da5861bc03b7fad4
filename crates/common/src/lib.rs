//! Shared types for logwarden: configuration, error taxonomy and the
//! `Event` record every other crate consumes.

pub mod config;
pub mod error;
pub mod event;

pub use config::{AppConfig, AuditConfig, RuleConfig, UnbanConfig, UnbanPolicy};
pub use error::{LogwardenError, LogwardenResult};
pub use event::Event;
