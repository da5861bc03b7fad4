use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single timestamped request attributed to a key (usually a client IP).
///
/// `tag` carries the event sub-type the rules can filter on; for access
/// logs this is the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub timestamp: NaiveDateTime,
    pub tag: String,
}

impl Event {
    pub fn new(key: impl Into<String>, timestamp: NaiveDateTime, tag: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp,
            tag: tag.into(),
        }
    }
}
