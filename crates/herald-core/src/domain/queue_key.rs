//! Queue addressing: one ordered stream per (recipient, queue name).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::HeraldError;

/// Identifies one ordered delivery stream.
///
/// A recipient may own several independent streams ("daily", "onboarding",
/// ...). Ordering and the single in-flight guarantee hold per key only;
/// different keys never wait on each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueKey {
    pub recipient_id: String,
    pub queue_name: String,
}

impl QueueKey {
    pub fn new(recipient_id: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            queue_name: queue_name.into(),
        }
    }

    /// Build a key, rejecting blank components.
    pub fn parse(recipient_id: &str, queue_name: &str) -> Result<Self, HeraldError> {
        if recipient_id.trim().is_empty() {
            return Err(HeraldError::Validation("recipient_id must not be empty".into()));
        }
        if queue_name.trim().is_empty() {
            return Err(HeraldError::Validation("queue_name must not be empty".into()));
        }
        Ok(Self::new(recipient_id, queue_name))
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.recipient_id, self.queue_name)
    }
}
