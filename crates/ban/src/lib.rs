//! Ban state and audit trail for logwarden.
//!
//! [`BanRegistry`] owns the ban state of every key. A key is banned at most
//! once at a time; each ban schedules its own unban after the breached rule's
//! cooldown. Every transition is appended to an [`AuditSink`] on a
//! best-effort basis: a failed write is logged and the transition stands.

pub mod audit;
pub mod registry;

pub use audit::{AuditAction, AuditRecord, AuditSink, CsvAuditSink, MemoryAuditSink};
pub use registry::{BanRecord, BanRegistry, BanState};
