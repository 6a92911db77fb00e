//! Queue entry record: metadata + payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntryId, ProviderMessageId};
use super::payload::MessagePayload;
use super::queue_key::QueueKey;
use super::status::EntryStatus;

/// One unit of ordered, confirmable delivery work.
///
/// Design:
/// - The store row is the single source of truth for entry state.
/// - All state changes go through `apply`, driven by an `EntryChange`
///   that the store only applies when its precondition still holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub recipient_id: String,
    pub queue_name: String,

    /// Position within the queue; assigned by the store, never reused.
    pub sequence: u64,

    pub payload: MessagePayload,
    pub status: EntryStatus,

    /// Provider id of the current send, once the transport accepted it.
    pub linked_message_id: Option<ProviderMessageId>,

    /// Failed sends so far.
    pub retry_count: u32,
    pub max_retries: u32,

    /// When the current attempt took the in-flight slot.
    pub claimed_at: Option<DateTime<Utc>>,

    /// When the transport accepted the current attempt.
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,

    /// Earliest re-send time while backing off after a failure.
    pub not_before: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Materialize a new pending entry at `sequence`.
    pub fn from_new(key: &QueueKey, sequence: u64, new: NewEntry) -> Self {
        Self {
            id: new.id,
            recipient_id: key.recipient_id.clone(),
            queue_name: key.queue_name.clone(),
            sequence,
            payload: new.payload,
            status: EntryStatus::Pending,
            linked_message_id: None,
            retry_count: 0,
            max_retries: new.max_retries,
            claimed_at: None,
            sent_at: None,
            delivered_at: None,
            not_before: None,
            last_error: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        }
    }

    pub fn key(&self) -> QueueKey {
        QueueKey::new(self.recipient_id.clone(), self.queue_name.clone())
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Apply a state change. Callers check the transition is legal first.
    pub fn apply(&mut self, change: EntryChange, now: DateTime<Utc>) {
        self.status = change.target_status();
        match change {
            EntryChange::Claim { claimed_at } => {
                self.claimed_at = Some(claimed_at);
                self.not_before = None;
            }
            EntryChange::Link {
                message_id,
                sent_at,
            } => {
                self.linked_message_id = Some(message_id);
                self.sent_at = Some(sent_at);
            }
            EntryChange::MarkDelivered { delivered_at } => {
                self.delivered_at = Some(delivered_at);
            }
            EntryChange::Requeue { error, not_before } => {
                self.retry_count += 1;
                self.claimed_at = None;
                self.sent_at = None;
                self.linked_message_id = None;
                self.not_before = not_before;
                self.last_error = Some(error);
            }
            EntryChange::MarkFailed { error } => {
                self.last_error = Some(error);
            }
        }
        self.updated_at = now;
    }
}

/// A payload ready to be appended; the store assigns its sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub id: EntryId,
    pub payload: MessagePayload,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

/// A state change requested of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    /// Pending -> Sent: reserve the in-flight slot before sending.
    Claim { claimed_at: DateTime<Utc> },

    /// Sent -> Sent: the transport accepted the send.
    Link {
        message_id: ProviderMessageId,
        sent_at: DateTime<Utc>,
    },

    /// Sent -> Delivered.
    MarkDelivered { delivered_at: DateTime<Utc> },

    /// Sent -> Pending: consume one retry and wait for the next send.
    Requeue {
        error: String,
        not_before: Option<DateTime<Utc>>,
    },

    /// Sent -> Failed: retries exhausted.
    MarkFailed { error: String },
}

impl EntryChange {
    pub fn target_status(&self) -> EntryStatus {
        match self {
            EntryChange::Claim { .. } | EntryChange::Link { .. } => EntryStatus::Sent,
            EntryChange::MarkDelivered { .. } => EntryStatus::Delivered,
            EntryChange::Requeue { .. } => EntryStatus::Pending,
            EntryChange::MarkFailed { .. } => EntryStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use ulid::Ulid;

    fn pending_entry() -> QueueEntry {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        QueueEntry::from_new(
            &QueueKey::new("user-1", "daily"),
            3,
            NewEntry {
                id: EntryId::from_ulid(Ulid::new()),
                payload: MessagePayload::text("good morning"),
                max_retries: 2,
                created_at,
            },
        )
    }

    #[test]
    fn new_entry_starts_pending() {
        let entry = pending_entry();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.sequence, 3);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.sent_at.is_none());
        assert_eq!(entry.key(), QueueKey::new("user-1", "daily"));
    }

    #[test]
    fn claim_then_link_records_send() {
        let mut entry = pending_entry();
        let now = entry.created_at + TimeDelta::seconds(5);

        entry.apply(EntryChange::Claim { claimed_at: now }, now);
        assert_eq!(entry.status, EntryStatus::Sent);
        assert_eq!(entry.claimed_at, Some(now));
        // not sent until the transport accepts it
        assert!(entry.sent_at.is_none());
        assert!(entry.linked_message_id.is_none());

        let accepted = now + TimeDelta::seconds(2);
        entry.apply(
            EntryChange::Link {
                message_id: ProviderMessageId::from("SM1"),
                sent_at: accepted,
            },
            accepted,
        );
        assert_eq!(entry.status, EntryStatus::Sent);
        assert_eq!(entry.sent_at, Some(accepted));
        assert_eq!(entry.claimed_at, Some(now));
        assert_eq!(entry.linked_message_id, Some(ProviderMessageId::from("SM1")));
    }

    #[test]
    fn requeue_consumes_retry_and_clears_send_fields() {
        let mut entry = pending_entry();
        let now = entry.created_at;
        entry.apply(EntryChange::Claim { claimed_at: now }, now);
        entry.apply(
            EntryChange::Link {
                message_id: "SM1".into(),
                sent_at: now,
            },
            now,
        );

        let later = now + TimeDelta::seconds(30);
        entry.apply(
            EntryChange::Requeue {
                error: "carrier rejected".into(),
                not_before: Some(later),
            },
            now,
        );

        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.claimed_at.is_none());
        assert!(entry.sent_at.is_none());
        assert!(entry.linked_message_id.is_none());
        assert_eq!(entry.not_before, Some(later));
        assert_eq!(entry.last_error.as_deref(), Some("carrier rejected"));
        assert!(entry.has_retries_left());
    }

    #[test]
    fn mark_failed_keeps_retry_count() {
        let mut entry = pending_entry();
        let now = entry.created_at;
        entry.apply(EntryChange::Claim { claimed_at: now }, now);
        entry.apply(EntryChange::MarkFailed { error: "timeout".into() }, now);

        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }
}
