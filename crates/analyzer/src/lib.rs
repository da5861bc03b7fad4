//! Batch analysis of access logs against sliding-window rate rules.
//!
//! The log is parsed into per-key event lists ([`log_parser`]), then the
//! [`Dispatcher`] runs one [`KeyEvaluator`] per key concurrently. Evaluators
//! share nothing but the [`BanRegistry`](logwarden_ban::BanRegistry), which
//! places bans, writes the audit trail and lifts bans after their cooldown.

pub mod dispatcher;
pub mod evaluator;
pub mod log_parser;

pub use dispatcher::{BanSummary, Dispatcher, RunReport};
pub use evaluator::{KeyEvaluator, KeyOutcome};
pub use log_parser::{parse_file, parse_line, parse_reader, ParsedLog};
