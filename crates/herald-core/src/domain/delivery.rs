//! Provider-side view of a message's fate.

use serde::{Deserialize, Serialize};

/// What the transport knows about a previously accepted send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),

    /// Still in transit, or the transport cannot tell.
    Unknown,
}

impl DeliveryStatus {
    pub fn is_known(&self) -> bool {
        !matches!(self, DeliveryStatus::Unknown)
    }
}
