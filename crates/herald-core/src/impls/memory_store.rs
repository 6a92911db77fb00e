//! In-memory queue store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    EntryChange, EntryId, NewEntry, ProviderMessageId, QueueCounts, QueueEntry, QueueKey,
    StoreError,
};
use crate::ports::{Expected, QueueStore};

/// Per-queue index: sequence -> entry id.
#[derive(Debug, Default)]
struct QueueIndex {
    /// Next sequence to hand out. Never decreases, even when rows are deleted.
    next_sequence: u64,
    members: BTreeMap<u64, EntryId>,
}

/// Store state guarded by a single mutex.
#[derive(Debug, Default)]
struct InMemoryStoreState {
    /// All entries (single source of truth).
    entries: HashMap<EntryId, QueueEntry>,

    /// Ordering per queue (ids only).
    queues: HashMap<QueueKey, QueueIndex>,

    /// Provider message id -> entry, for webhook correlation.
    by_message: HashMap<ProviderMessageId, EntryId>,
}

impl InMemoryStoreState {
    fn head(&self, key: &QueueKey) -> Option<&QueueEntry> {
        let index = self.queues.get(key)?;
        index
            .members
            .values()
            .filter_map(|id| self.entries.get(id))
            .find(|entry| !entry.status.is_terminal())
    }

    fn list(&self, key: &QueueKey) -> Vec<QueueEntry> {
        self.queues
            .get(key)
            .map(|index| {
                index
                    .members
                    .values()
                    .filter_map(|id| self.entries.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Queue store kept in process memory.
///
/// Every operation runs under one `tokio::sync::Mutex`, which makes each
/// `compare_and_set` atomic the same way a single-row conditional `UPDATE`
/// is in a database. Nothing is awaited while the lock is held.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn append(
        &self,
        key: &QueueKey,
        entries: Vec<NewEntry>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let index = state.queues.entry(key.clone()).or_default();
        let mut appended = Vec::with_capacity(entries.len());
        for new in entries {
            let sequence = index.next_sequence;
            index.next_sequence += 1;

            let entry = QueueEntry::from_new(key, sequence, new);
            index.members.insert(sequence, entry.id);
            state.entries.insert(entry.id, entry.clone());
            appended.push(entry);
        }
        Ok(appended)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.get(&id).cloned())
    }

    async fn head(&self, key: &QueueKey) -> Result<Option<QueueEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.head(key).cloned())
    }

    async fn find_by_linked_message_id(
        &self,
        message_id: &ProviderMessageId,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .by_message
            .get(message_id)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn compare_and_set(
        &self,
        id: EntryId,
        expected: Expected,
        change: EntryChange,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let entry = state.entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.status != expected.status || entry.retry_count != expected.retry_count {
            return Ok(None);
        }

        let target = change.target_status();
        if !entry.status.can_transition_to(target) {
            return Err(StoreError::IllegalTransition {
                entry: id,
                from: entry.status,
                to: target,
            });
        }

        // The previous attempt's provider id no longer identifies this entry.
        if let EntryChange::Requeue { .. } = change
            && let Some(old) = entry.linked_message_id.take()
        {
            state.by_message.remove(&old);
        }
        if let EntryChange::Link { message_id, .. } = &change {
            state.by_message.insert(message_id.clone(), id);
        }

        entry.apply(change, now);
        Ok(Some(entry.clone()))
    }

    async fn stalled(
        &self,
        sent_before: DateTime<Utc>,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut stalled: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|entry| entry.status.is_in_flight())
            .filter(|entry| match entry.sent_at {
                Some(sent_at) => sent_at < sent_before,
                None => entry.claimed_at.is_some_and(|at| at < claimed_before),
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|entry| entry.sent_at.or(entry.claimed_at));
        Ok(stalled)
    }

    async fn backoff_due(&self, now: DateTime<Utc>) -> Result<Vec<QueueKey>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<QueueKey> = state
            .queues
            .keys()
            .filter(|key| {
                state.head(key).is_some_and(|head| {
                    !head.status.is_in_flight() && head.not_before.is_none_or(|t| t <= now)
                })
            })
            .cloned()
            .collect();
        due.sort();
        Ok(due)
    }

    async fn counts(&self, key: &QueueKey) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(state.list(key).iter().map(|entry| entry.status).collect())
    }

    async fn list(&self, key: &QueueKey) -> Result<Vec<QueueEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.list(key))
    }

    async fn delete_terminal(&self, key: &QueueKey) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let Some(index) = state.queues.get_mut(key) else {
            return Ok(0);
        };

        let mut removed = 0;
        index.members.retain(|_, id| {
            let terminal = state
                .entries
                .get(id)
                .is_some_and(|entry| entry.status.is_terminal());
            if terminal {
                if let Some(entry) = state.entries.remove(id) {
                    if let Some(message_id) = entry.linked_message_id {
                        state.by_message.remove(&message_id);
                    }
                }
                removed += 1;
            }
            !terminal
        });
        Ok(removed)
    }
}
