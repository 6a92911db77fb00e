//! Status - operator view of a queue.
//!
//! Besides the per-state counts, explains what the queue is waiting on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EntryId, EntryStatus, ProviderMessageId, QueueCounts, QueueEntry, QueueKey};

/// Snapshot returned by `QueueEngine::get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub key: QueueKey,
    pub counts: QueueCounts,

    /// Why the queue is not moving right now, if it has work left.
    pub blocked_on: Option<BlockedOn>,
}

/// What the head of a queue is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockedOn {
    /// Head holds the in-flight slot. `sent_at` stays empty until the
    /// transport accepts the send.
    Confirmation {
        entry: EntryId,
        sequence: u64,
        claimed_at: Option<DateTime<Utc>>,
        sent_at: Option<DateTime<Utc>>,
        message_id: Option<ProviderMessageId>,
    },

    /// Head failed and is waiting out its retry delay.
    Backoff {
        entry: EntryId,
        sequence: u64,
        retry_count: u32,
        until: DateTime<Utc>,
    },

    /// Head is pending and will go out on the next advance.
    Dispatch { entry: EntryId, sequence: u64 },
}

impl BlockedOn {
    /// Describe the head entry as seen at `now`.
    pub fn from_head(head: &QueueEntry, now: DateTime<Utc>) -> Option<Self> {
        match head.status {
            EntryStatus::Sent => Some(BlockedOn::Confirmation {
                entry: head.id,
                sequence: head.sequence,
                claimed_at: head.claimed_at,
                sent_at: head.sent_at,
                message_id: head.linked_message_id.clone(),
            }),
            EntryStatus::Pending => match head.not_before {
                Some(until) if until > now => Some(BlockedOn::Backoff {
                    entry: head.id,
                    sequence: head.sequence,
                    retry_count: head.retry_count,
                    until,
                }),
                _ => Some(BlockedOn::Dispatch {
                    entry: head.id,
                    sequence: head.sequence,
                }),
            },
            EntryStatus::Delivered | EntryStatus::Failed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryChange, MessagePayload, NewEntry};
    use chrono::{TimeDelta, TimeZone};
    use ulid::Ulid;

    fn head() -> QueueEntry {
        QueueEntry::from_new(
            &QueueKey::new("user-1", "daily"),
            0,
            NewEntry {
                id: EntryId::from_ulid(Ulid::new()),
                payload: MessagePayload::text("m1"),
                max_retries: 3,
                created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            },
        )
    }

    #[test]
    fn pending_head_is_waiting_for_dispatch() {
        let entry = head();
        let blocked = BlockedOn::from_head(&entry, entry.created_at).unwrap();
        assert!(matches!(blocked, BlockedOn::Dispatch { sequence: 0, .. }));
    }

    #[test]
    fn backing_off_head_reports_until() {
        let mut entry = head();
        let now = entry.created_at;
        entry.apply(EntryChange::Claim { claimed_at: now }, now);
        let until = now + TimeDelta::seconds(30);
        entry.apply(
            EntryChange::Requeue {
                error: "busy".into(),
                not_before: Some(until),
            },
            now,
        );

        let blocked = BlockedOn::from_head(&entry, now).unwrap();
        assert_eq!(
            blocked,
            BlockedOn::Backoff {
                entry: entry.id,
                sequence: 0,
                retry_count: 1,
                until,
            }
        );

        let later = BlockedOn::from_head(&entry, until).unwrap();
        assert!(matches!(later, BlockedOn::Dispatch { .. }));
    }

    #[test]
    fn sent_head_waits_for_confirmation() {
        let mut entry = head();
        let now = entry.created_at;
        entry.apply(EntryChange::Claim { claimed_at: now }, now);

        let json = serde_json::to_value(BlockedOn::from_head(&entry, now).unwrap()).unwrap();
        assert_eq!(json["reason"], "confirmation");
        assert!(json["sent_at"].is_null());
        assert!(json["claimed_at"].is_string());
    }
}
