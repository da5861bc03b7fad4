//! Sliding-window rate rules for logwarden.
//!
//! - [`RateWindow`] -- a fixed-capacity ring of timestamps holding the most
//!   recent events, answering how many of them fall inside a trailing window.
//!   Capacity and window length can be changed in place without losing the
//!   newest history.
//!
//! - [`RuleSet`] -- an ordered group of windows, each with its own limit and
//!   optional tag filter, that reports the first rule a new event breaches.
//!
//! - [`WindowPool`] -- a typed reuse pool that resets windows on release.

pub mod pool;
pub mod ring_window;
pub mod rule_set;

pub use pool::{PooledWindow, WindowPool};
pub use ring_window::RateWindow;
pub use rule_set::{Breach, Rule, RuleSet};
