//! QueueStore port - the source of truth for queue entries.
//!
//! Every engine instance (webhook handlers, scheduled jobs, chat flows, maybe
//! in different processes) shares one store. The store is the only
//! serialization point: entries change solely through `compare_and_set`, a
//! conditional update that applies only while the row still matches what the
//! caller last read.
//!
//! # Implementations
//! - `InMemoryQueueStore` (development / tests)
//! - SQL stores implement `compare_and_set` as
//!   `UPDATE ... WHERE id = ? AND status = ? AND retry_count = ?`

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EntryChange, EntryId, EntryStatus, NewEntry, ProviderMessageId, QueueCounts, QueueEntry,
    QueueKey, StoreError,
};

/// Precondition of a conditional update.
///
/// Status alone is not enough: after a failed send the entry goes back to
/// `Pending` and is sent again, so a stale caller could otherwise act on the
/// next attempt. `retry_count` changes on every retry, so `(status,
/// retry_count)` pins a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: EntryStatus,
    pub retry_count: u32,
}

impl Expected {
    /// Expect the entry to be exactly as it was read.
    pub fn of(entry: &QueueEntry) -> Self {
        Self {
            status: entry.status,
            retry_count: entry.retry_count,
        }
    }
}

/// Durable storage of queue entries.
///
/// # Contract
/// - `append` is all-or-nothing and assigns consecutive sequences after the
///   highest ever assigned for the key (deleted rows do not free sequences).
/// - `head` returns the lowest-sequence non-terminal entry.
/// - `compare_and_set` returns `Ok(None)` when the precondition does not hold
///   (lost race), and `Err(IllegalTransition)` when the change is not an edge
///   of the state machine.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a batch as `Pending`, in order.
    async fn append(
        &self,
        key: &QueueKey,
        entries: Vec<NewEntry>,
    ) -> Result<Vec<QueueEntry>, StoreError>;

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, StoreError>;

    /// Lowest-sequence entry of `key` that is not terminal.
    async fn head(&self, key: &QueueKey) -> Result<Option<QueueEntry>, StoreError>;

    async fn find_by_linked_message_id(
        &self,
        message_id: &ProviderMessageId,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// Apply `change` only if the entry still matches `expected`, stamping
    /// `updated_at` with `now`.
    ///
    /// Returns the updated entry, or `None` if the precondition failed.
    async fn compare_and_set(
        &self,
        id: EntryId,
        expected: Expected,
        change: EntryChange,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, StoreError>;

    /// `Sent` entries that look abandoned, oldest first:
    /// - accepted by the transport (`sent_at`) before `sent_before`, or
    /// - claimed before `claimed_before` and never accepted (the sender died
    ///   between claim and link).
    async fn stalled(
        &self,
        sent_before: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, StoreError>;

    /// Queues whose head is `Pending` and ready to send at `now`: its retry
    /// delay (if any) has elapsed.
    async fn backoff_due(&self, now: DateTime<Utc>) -> Result<Vec<QueueKey>, StoreError>;

    async fn counts(&self, key: &QueueKey) -> Result<QueueCounts, StoreError>;

    /// All entries of `key` in sequence order.
    async fn list(&self, key: &QueueKey) -> Result<Vec<QueueEntry>, StoreError>;

    /// Remove `Delivered` and `Failed` entries of `key`; returns how many.
    async fn delete_terminal(&self, key: &QueueKey) -> Result<usize, StoreError>;
}
