//! Entry state machine and per-queue counts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery state of a queue entry.
///
/// State transitions:
/// - Pending -> Sent -> Delivered
/// - Pending -> Sent -> Pending (failure with retries left; loops)
/// - Pending -> Sent -> Failed (failure with retries exhausted, or stall)
/// - Sent -> Sent (provider message id recorded after the send returns)
///
/// Delivered and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting for its turn (or for a retry).
    Pending,

    /// Handed to the transport; awaiting confirmation.
    Sent,

    /// Provider confirmed delivery.
    Delivered,

    /// Retries exhausted; the queue has moved past it.
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Delivered | EntryStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, EntryStatus::Sent)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Sent) | (Sent, Delivered) | (Sent, Pending) | (Sent, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Sent => "sent",
            EntryStatus::Delivered => "delivered",
            EntryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of entries per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub sent: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: EntryStatus) {
        match status {
            EntryStatus::Pending => self.pending += 1,
            EntryStatus::Sent => self.sent += 1,
            EntryStatus::Delivered => self.delivered += 1,
            EntryStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.sent + self.delivered + self.failed
    }

    /// Nothing left to deliver.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.sent == 0
    }
}

impl FromIterator<EntryStatus> for QueueCounts {
    fn from_iter<I: IntoIterator<Item = EntryStatus>>(iter: I) -> Self {
        let mut counts = QueueCounts::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}
