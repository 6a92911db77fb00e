//! QueueEngine - per-recipient ordered delivery.
//!
//! # Flow
//! 1. `enqueue` persists a batch as `pending` and advances the queue.
//! 2. `advance` claims the head (`pending -> sent`) and hands it to the
//!    transport. Nothing else in that queue moves until the head is settled.
//! 3. `confirm_delivered` / `confirm_failed` (from the webhook adapter)
//!    settle the head and advance again.
//! 4. `sweep_stalled` settles heads whose confirmation never came.
//!
//! A claimed head is `sent` from the moment it takes the slot, but `sent_at`
//! is only stamped once the transport accepts it. The sweep judges accepted
//! sends by `sent_at` and bare claims by `claimed_at + send_timeout`, and
//! never touches a send this process is still making.
//!
//! The engine keeps no state of its own. Every transition is a conditional
//! update against the store, so any number of engines (threads, processes)
//! may drive the same queues. Losing a conditional update just means another
//! caller got there first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::retry::RetryPolicy;
use super::status::{BlockedOn, QueueStatus};
use crate::domain::{
    DeliveryStatus, EntryChange, EntryId, EntryStatus, HeraldError, MessagePayload, NewEntry,
    ProviderMessageId, QueueEntry, QueueKey, TransportError,
};
use crate::ports::{Clock, DeliveryTransport, Expected, IdGenerator, QueueStore};

/// Failure reason recorded when a stalled send cannot be reconciled.
pub const STALL_TIMEOUT_REASON: &str = "timeout";

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// No non-terminal entries.
    Idle,

    /// The head is already sent; waiting for its confirmation.
    InFlight(EntryId),

    /// The head is waiting out a retry delay.
    BackingOff { entry: EntryId, until: DateTime<Utc> },

    /// The head was sent and the provider id recorded.
    Dispatched {
        entry: EntryId,
        message_id: ProviderMessageId,
    },

    /// A concurrent caller changed the head first; nothing was done here.
    LostRace,
}

/// Result of a confirmation (webhook or sweep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Delivered,

    /// Back to `pending`; will be re-sent in the same position.
    Retrying { retry_count: u32 },

    /// Retries exhausted; the queue moves on without it.
    Failed,

    Ignored { reason: IgnoreReason },
}

/// Why a confirmation changed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No entry carries this provider id (never linked, or superseded by a retry).
    UnknownMessage,

    /// The entry is not in flight (typically a duplicate webhook).
    NotInFlight { status: EntryStatus },

    /// A concurrent confirmation settled the entry first.
    LostRace,
}

impl ConfirmOutcome {
    fn ignored(reason: IgnoreReason) -> Self {
        ConfirmOutcome::Ignored { reason }
    }
}

/// Summary of one stall sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stalled entries found.
    pub examined: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,

    /// Settled elsewhere meanwhile, or could not be settled.
    pub skipped: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &ConfirmOutcome) {
        match outcome {
            ConfirmOutcome::Delivered => self.delivered += 1,
            ConfirmOutcome::Retrying { .. } => self.retried += 1,
            ConfirmOutcome::Failed => self.failed += 1,
            ConfirmOutcome::Ignored { .. } => self.skipped += 1,
        }
    }
}

/// Entries this process is handing to the transport right now.
///
/// Counted, since a caller that loses the claim also registers briefly.
#[derive(Debug, Clone, Default)]
struct SendsInProgress {
    active: Arc<Mutex<HashMap<EntryId, usize>>>,
}

impl SendsInProgress {
    fn begin(&self, id: EntryId) -> SendGuard {
        *self.lock().entry(id).or_insert(0) += 1;
        SendGuard {
            sends: self.clone(),
            id,
        }
    }

    fn contains(&self, id: EntryId) -> bool {
        self.lock().contains_key(&id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntryId, usize>> {
        // the map stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SendGuard {
    sends: SendsInProgress,
    id: EntryId,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        let mut active = self.sends.lock();
        if let Some(count) = active.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.id);
            }
        }
    }
}

/// `now - span`, saturating at the earliest representable instant.
fn earlier(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(span)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The ordered delivery engine. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn DeliveryTransport>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
    max_retries: u32,
    send_timeout: Duration,
    sends: SendsInProgress,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn DeliveryTransport>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry_policy: RetryPolicy,
        max_retries: u32,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            ids,
            retry_policy,
            max_retries,
            send_timeout,
            sends: SendsInProgress::default(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // ------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------

    /// Queue `payloads` for delivery, in order, with the default retry bound.
    ///
    /// Returns once the batch is persisted; delivery continues asynchronously
    /// through confirmations. Only persistence errors are returned.
    pub async fn enqueue(
        &self,
        recipient_id: &str,
        queue_name: &str,
        payloads: Vec<MessagePayload>,
    ) -> Result<Vec<EntryId>, HeraldError> {
        self.enqueue_with_max_retries(recipient_id, queue_name, payloads, self.max_retries)
            .await
    }

    /// Like `enqueue`, with a per-batch retry bound (`0` fails on the first
    /// failed send).
    #[instrument(
        skip(self, payloads),
        fields(recipient = %recipient_id, queue = %queue_name, count = payloads.len())
    )]
    pub async fn enqueue_with_max_retries(
        &self,
        recipient_id: &str,
        queue_name: &str,
        payloads: Vec<MessagePayload>,
        max_retries: u32,
    ) -> Result<Vec<EntryId>, HeraldError> {
        let key = QueueKey::parse(recipient_id, queue_name)?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = self.clock.now();
        let batch = payloads
            .into_iter()
            .map(|payload| NewEntry {
                id: self.ids.generate_entry_id(),
                payload,
                max_retries,
                created_at,
            })
            .collect();

        let appended = self.store.append(&key, batch).await?;
        info!(
            first_sequence = appended.first().map(|e| e.sequence),
            last_sequence = appended.last().map(|e| e.sequence),
            "enqueued messages"
        );

        self.advance_quietly(&key).await;
        Ok(appended.into_iter().map(|entry| entry.id).collect())
    }

    // ------------------------------------------------------------------
    // Advance
    // ------------------------------------------------------------------

    /// Send the head of the queue if nothing is in flight.
    ///
    /// Safe to call redundantly and concurrently: the head is claimed with a
    /// conditional `pending -> sent` update *before* the transport is called,
    /// so at most one caller ever sends it.
    #[instrument(skip(self), fields(queue = %key))]
    pub async fn advance(&self, key: &QueueKey) -> Result<AdvanceOutcome, HeraldError> {
        loop {
            let Some(head) = self.store.head(key).await? else {
                return Ok(AdvanceOutcome::Idle);
            };

            match head.status {
                EntryStatus::Pending => {}
                EntryStatus::Sent => return Ok(AdvanceOutcome::InFlight(head.id)),
                EntryStatus::Delivered | EntryStatus::Failed => {
                    warn!(entry = %head.id, status = %head.status, "store returned a terminal head");
                    return Ok(AdvanceOutcome::Idle);
                }
            }

            let now = self.clock.now();
            if let Some(until) = head.not_before
                && until > now
            {
                return Ok(AdvanceOutcome::BackingOff {
                    entry: head.id,
                    until,
                });
            }

            // Registered before the claim, so a sweep never sees this claim
            // without also seeing the send in progress.
            let _sending = self.sends.begin(head.id);
            let claim = EntryChange::Claim { claimed_at: now };
            let Some(claimed) = self
                .store
                .compare_and_set(head.id, Expected::of(&head), claim, now)
                .await?
            else {
                debug!(entry = %head.id, "head claimed by another caller");
                return Ok(AdvanceOutcome::LostRace);
            };

            match self.send(&claimed).await {
                Ok(message_id) => {
                    let sent_at = self.clock.now();
                    let link = EntryChange::Link {
                        message_id: message_id.clone(),
                        sent_at,
                    };
                    let linked = self
                        .store
                        .compare_and_set(claimed.id, Expected::of(&claimed), link, sent_at)
                        .await?;
                    if linked.is_none() {
                        // Settled (e.g. by the sweep) while the send was running.
                        debug!(entry = %claimed.id, %message_id, "entry changed during send; discarding provider id");
                        return Ok(AdvanceOutcome::LostRace);
                    }
                    info!(
                        entry = %claimed.id,
                        sequence = claimed.sequence,
                        retry_count = claimed.retry_count,
                        %message_id,
                        "message sent"
                    );
                    return Ok(AdvanceOutcome::Dispatched {
                        entry: claimed.id,
                        message_id,
                    });
                }
                Err(err) => {
                    warn!(
                        entry = %claimed.id,
                        sequence = claimed.sequence,
                        kind = ?err.kind(),
                        error = %err,
                        "send failed"
                    );
                    match self.settle_failure(&claimed, err.to_string()).await? {
                        ConfirmOutcome::Ignored { .. } => return Ok(AdvanceOutcome::LostRace),
                        // Retry immediately, back off, or move past it.
                        _ => continue,
                    }
                }
            }
        }
    }

    /// Advance and log instead of returning errors.
    ///
    /// Used after enqueue and confirmations: the caller's own operation has
    /// already succeeded, and any later problem is recovered by the next
    /// confirmation or sweep.
    async fn advance_quietly(&self, key: &QueueKey) {
        if let Err(err) = self.advance(key).await {
            warn!(
                queue = %key,
                kind = ?err.kind(),
                error = %err,
                "advance failed; will resume on next trigger"
            );
        }
    }

    async fn send(&self, entry: &QueueEntry) -> Result<ProviderMessageId, TransportError> {
        match tokio::time::timeout(
            self.send_timeout,
            self.transport.send(&entry.recipient_id, &entry.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.send_timeout)),
        }
    }

    // ------------------------------------------------------------------
    // Confirmations (webhook adapter)
    // ------------------------------------------------------------------

    /// The provider reports `message_id` delivered.
    ///
    /// Idempotent: duplicates and late callbacks are ignored.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn confirm_delivered(
        &self,
        message_id: &ProviderMessageId,
    ) -> Result<ConfirmOutcome, HeraldError> {
        let Some(entry) = self.store.find_by_linked_message_id(message_id).await? else {
            debug!("no entry for provider message id");
            return Ok(ConfirmOutcome::ignored(IgnoreReason::UnknownMessage));
        };

        let outcome = if entry.status.is_in_flight() {
            self.settle_delivered(&entry).await?
        } else {
            debug!(entry = %entry.id, status = %entry.status, "ignoring confirmation for entry not in flight");
            ConfirmOutcome::ignored(IgnoreReason::NotInFlight {
                status: entry.status,
            })
        };

        self.advance_quietly(&entry.key()).await;
        Ok(outcome)
    }

    /// The provider reports `message_id` failed.
    ///
    /// Consumes one retry; the entry keeps its place in the queue until
    /// retries run out, then the queue moves past it.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub async fn confirm_failed(
        &self,
        message_id: &ProviderMessageId,
        reason: &str,
    ) -> Result<ConfirmOutcome, HeraldError> {
        let Some(entry) = self.store.find_by_linked_message_id(message_id).await? else {
            debug!("no entry for provider message id");
            return Ok(ConfirmOutcome::ignored(IgnoreReason::UnknownMessage));
        };

        let outcome = if entry.status.is_in_flight() {
            self.settle_failure(&entry, reason.to_string()).await?
        } else {
            debug!(entry = %entry.id, status = %entry.status, "ignoring failure for entry not in flight");
            ConfirmOutcome::ignored(IgnoreReason::NotInFlight {
                status: entry.status,
            })
        };

        self.advance_quietly(&entry.key()).await;
        Ok(outcome)
    }

    async fn settle_delivered(&self, entry: &QueueEntry) -> Result<ConfirmOutcome, HeraldError> {
        let now = self.clock.now();
        let change = EntryChange::MarkDelivered { delivered_at: now };
        match self
            .store
            .compare_and_set(entry.id, Expected::of(entry), change, now)
            .await?
        {
            Some(updated) => {
                info!(entry = %updated.id, sequence = updated.sequence, "message delivered");
                Ok(ConfirmOutcome::Delivered)
            }
            None => Ok(ConfirmOutcome::ignored(IgnoreReason::LostRace)),
        }
    }

    /// Shared failure path for send errors, failure webhooks and stalls.
    async fn settle_failure(
        &self,
        entry: &QueueEntry,
        reason: String,
    ) -> Result<ConfirmOutcome, HeraldError> {
        let change = if entry.has_retries_left() {
            let delay = self.retry_policy.next_delay(entry.retry_count + 1);
            EntryChange::Requeue {
                error: reason,
                not_before: self.after(delay),
            }
        } else {
            EntryChange::MarkFailed { error: reason }
        };

        let Some(updated) = self
            .store
            .compare_and_set(entry.id, Expected::of(entry), change, self.clock.now())
            .await?
        else {
            return Ok(ConfirmOutcome::ignored(IgnoreReason::LostRace));
        };

        if updated.status == EntryStatus::Failed {
            warn!(
                entry = %updated.id,
                sequence = updated.sequence,
                retry_count = updated.retry_count,
                error = updated.last_error.as_deref().unwrap_or_default(),
                "retries exhausted; skipping message"
            );
            Ok(ConfirmOutcome::Failed)
        } else {
            info!(
                entry = %updated.id,
                sequence = updated.sequence,
                retry_count = updated.retry_count,
                max_retries = updated.max_retries,
                not_before = ?updated.not_before,
                "delivery failed; will retry"
            );
            Ok(ConfirmOutcome::Retrying {
                retry_count: updated.retry_count,
            })
        }
    }

    /// `now + delay`, or `None` when there is nothing to wait for.
    fn after(&self, delay: Duration) -> Option<DateTime<Utc>> {
        if delay.is_zero() {
            return None;
        }
        TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| self.clock.now().checked_add_signed(delta))
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Settle entries the transport accepted more than `cutoff` ago, and
    /// claims whose sender vanished before the transport answered (older
    /// than the send timeout). Sends still running in this process are
    /// left alone.
    ///
    /// Each is reconciled against the transport's status lookup; when the
    /// transport cannot tell, the send counts as failed with reason
    /// `"timeout"`. Settled queues are advanced, so a lost webhook never
    /// blocks a queue for good.
    #[instrument(skip(self))]
    pub async fn sweep_stalled(&self, cutoff: Duration) -> Result<SweepReport, HeraldError> {
        let now = self.clock.now();
        let stalled = self
            .store
            .stalled(earlier(now, cutoff), earlier(now, self.send_timeout))
            .await?;
        let mut report = SweepReport::default();

        for entry in stalled {
            if self.sends.contains(entry.id) {
                debug!(entry = %entry.id, "send still in progress; not stalled");
                continue;
            }
            report.examined += 1;

            let outcome = match self.reconcile(&entry).await {
                DeliveryStatus::Delivered => self.settle_delivered(&entry).await,
                DeliveryStatus::Failed(reason) => self.settle_failure(&entry, reason).await,
                DeliveryStatus::Unknown => {
                    warn!(
                        entry = %entry.id,
                        queue = %entry.key(),
                        claimed_at = ?entry.claimed_at,
                        sent_at = ?entry.sent_at,
                        "no delivery confirmation; treating send as timed out"
                    );
                    self.settle_failure(&entry, STALL_TIMEOUT_REASON.to_string())
                        .await
                }
            };

            match outcome {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    warn!(
                        entry = %entry.id,
                        kind = ?err.kind(),
                        error = %err,
                        "could not settle stalled entry"
                    );
                    report.skipped += 1;
                    continue;
                }
            }
            self.advance_quietly(&entry.key()).await;
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "stall sweep finished"
            );
        }
        Ok(report)
    }

    async fn reconcile(&self, entry: &QueueEntry) -> DeliveryStatus {
        let Some(message_id) = &entry.linked_message_id else {
            return DeliveryStatus::Unknown;
        };
        match tokio::time::timeout(self.send_timeout, self.transport.status(message_id)).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                warn!(entry = %entry.id, %message_id, error = %err, "status lookup failed");
                DeliveryStatus::Unknown
            }
            Err(_) => {
                warn!(entry = %entry.id, %message_id, "status lookup timed out");
                DeliveryStatus::Unknown
            }
        }
    }

    /// Advance every queue whose pending head is ready: its retry delay has
    /// elapsed, or an earlier advance never completed. Returns queues advanced.
    #[instrument(skip(self))]
    pub async fn resume_backoff(&self) -> Result<usize, HeraldError> {
        let due = self.store.backoff_due(self.clock.now()).await?;
        for key in &due {
            self.advance_quietly(key).await;
        }
        if !due.is_empty() {
            debug!(queues = due.len(), "resumed queues after backoff");
        }
        Ok(due.len())
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Per-state counts plus what the queue is waiting on.
    pub async fn get_status(
        &self,
        recipient_id: &str,
        queue_name: &str,
    ) -> Result<QueueStatus, HeraldError> {
        let key = QueueKey::parse(recipient_id, queue_name)?;
        let counts = self.store.counts(&key).await?;
        let head = self.store.head(&key).await?;
        let blocked_on = head.and_then(|head| BlockedOn::from_head(&head, self.clock.now()));
        Ok(QueueStatus {
            key,
            counts,
            blocked_on,
        })
    }

    /// Remove delivered and failed entries. Sequence numbering continues
    /// where it left off.
    #[instrument(skip(self))]
    pub async fn clear_terminal(
        &self,
        recipient_id: &str,
        queue_name: &str,
    ) -> Result<usize, HeraldError> {
        let key = QueueKey::parse(recipient_id, queue_name)?;
        let removed = self.store.delete_terminal(&key).await?;
        info!(queue = %key, removed, "cleared terminal entries");
        Ok(removed)
    }

    /// All entries of a queue in sequence order.
    pub async fn entries(
        &self,
        recipient_id: &str,
        queue_name: &str,
    ) -> Result<Vec<QueueEntry>, HeraldError> {
        let key = QueueKey::parse(recipient_id, queue_name)?;
        Ok(self.store.list(&key).await?)
    }

    pub async fn entry(&self, id: EntryId) -> Result<Option<QueueEntry>, HeraldError> {
        Ok(self.store.get(id).await?)
    }
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("retry_policy", &self.retry_policy)
            .field("max_retries", &self.max_retries)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::impls::{InMemoryQueueStore, InMemoryTransport};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    struct Harness {
        engine: QueueEngine,
        transport: InMemoryTransport,
        clock: Arc<FixedClock>,
    }

    fn harness(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Harness {
        harness_with(InMemoryTransport::new(), configure)
    }

    fn harness_with(
        transport: InMemoryTransport,
        configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
    ) -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ));
        let builder = EngineBuilder::new()
            .store(InMemoryQueueStore::new())
            .transport(transport.clone())
            .clock(clock.clone());
        let engine = configure(builder).build().unwrap();
        Harness {
            engine,
            transport,
            clock,
        }
    }

    fn key() -> QueueKey {
        QueueKey::new("user-1", "daily")
    }

    fn texts(texts: &[&str]) -> Vec<MessagePayload> {
        texts.iter().map(|t| MessagePayload::text(*t)).collect()
    }

    #[tokio::test]
    async fn advance_on_empty_queue_is_idle() {
        let h = harness(|b| b);
        assert_eq!(h.engine.advance(&key()).await.unwrap(), AdvanceOutcome::Idle);
    }

    #[tokio::test]
    async fn enqueue_sends_only_the_head() {
        let h = harness(|b| b);
        let ids = h
            .engine
            .enqueue("user-1", "daily", texts(&["m1", "m2", "m3"]))
            .await
            .unwrap();

        assert_eq!(ids.len(), 3);
        let sent = h.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.text, "m1");

        assert_eq!(
            h.engine.advance(&key()).await.unwrap(),
            AdvanceOutcome::InFlight(ids[0])
        );
        assert_eq!(h.transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let h = harness(|b| b);
        let ids = h.engine.enqueue("user-1", "daily", Vec::new()).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(h.transport.send_attempts(), 0);
    }

    #[tokio::test]
    async fn blank_recipient_is_rejected() {
        let h = harness(|b| b);
        let err = h
            .engine
            .enqueue(" ", "daily", texts(&["m1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HeraldError::Validation(_)));
    }

    #[tokio::test]
    async fn delivery_confirmation_releases_the_next_message() {
        let h = harness(|b| b);
        h.engine
            .enqueue("user-1", "daily", texts(&["m1", "m2"]))
            .await
            .unwrap();
        let first = h.transport.last_sent().await.unwrap();

        let outcome = h.engine.confirm_delivered(&first.message_id).await.unwrap();

        assert_eq!(outcome, ConfirmOutcome::Delivered);
        let second = h.transport.last_sent().await.unwrap();
        assert_eq!(second.payload.text, "m2");
    }

    #[tokio::test]
    async fn unknown_message_id_is_ignored() {
        let h = harness(|b| b);
        let outcome = h
            .engine
            .confirm_delivered(&ProviderMessageId::from("SM-nope"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConfirmOutcome::Ignored {
                reason: IgnoreReason::UnknownMessage
            }
        );
    }

    #[tokio::test]
    async fn synchronous_send_failure_consumes_a_retry_and_resends() {
        let h = harness(|b| b.max_retries(2));
        h.transport
            .fail_next_send(TransportError::Transient("503".into()))
            .await;

        let ids = h
            .engine
            .enqueue("user-1", "daily", texts(&["m1"]))
            .await
            .unwrap();

        let entry = h.engine.entry(ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Sent);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.linked_message_id.is_some());
        assert_eq!(h.transport.send_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out_and_counts_as_failure() {
        let transport = InMemoryTransport::new().with_latency(Duration::from_secs(5));
        let h = harness_with(transport, |b| {
            b.max_retries(1).send_timeout(Duration::from_secs(1))
        });

        let ids = h
            .engine
            .enqueue("user-1", "daily", texts(&["m1"]))
            .await
            .unwrap();

        let entry = h.engine.entry(ids[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.last_error.unwrap().contains("timed out"));
        assert_eq!(h.transport.send_attempts(), 2);
        assert!(h.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn failed_head_backs_off_until_resumed() {
        let h = harness(|b| {
            b.retry_policy(RetryPolicy::exponential(
                Duration::from_secs(30),
                2.0,
                Duration::from_secs(600),
            ))
        });
        h.transport
            .fail_next_send(TransportError::Transient("503".into()))
            .await;

        let ids = h
            .engine
            .enqueue("user-1", "daily", texts(&["m1", "m2"]))
            .await
            .unwrap();
        assert!(h.transport.sent().await.is_empty());

        let until = h.clock.now() + TimeDelta::seconds(30);
        assert_eq!(
            h.engine.advance(&key()).await.unwrap(),
            AdvanceOutcome::BackingOff {
                entry: ids[0],
                until
            }
        );
        assert_eq!(h.engine.resume_backoff().await.unwrap(), 0);

        h.clock.advance(Duration::from_secs(30));
        assert_eq!(h.engine.resume_backoff().await.unwrap(), 1);

        let sent = h.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.text, "m1");
    }

    #[tokio::test]
    async fn sweep_uses_provider_status_when_known() {
        let h = harness(|b| b);
        h.engine
            .enqueue("user-1", "daily", texts(&["m1", "m2"]))
            .await
            .unwrap();
        let first = h.transport.last_sent().await.unwrap();
        h.transport
            .set_status(&first.message_id, DeliveryStatus::Delivered)
            .await;

        h.clock.advance(Duration::from_secs(120));
        let report = h.engine.sweep_stalled(Duration::from_secs(60)).await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                examined: 1,
                delivered: 1,
                ..SweepReport::default()
            }
        );
        assert_eq!(h.transport.last_sent().await.unwrap().payload.text, "m2");
    }

    #[tokio::test]
    async fn sweep_recovers_a_claim_whose_sender_vanished() {
        let h = harness(|b| b.send_timeout(Duration::from_secs(10)));
        let store = &h.engine.store;
        let appended = store
            .append(
                &key(),
                vec![NewEntry {
                    id: EntryId::from_ulid(ulid::Ulid::new()),
                    payload: MessagePayload::text("m1"),
                    max_retries: 2,
                    created_at: h.clock.now(),
                }],
            )
            .await
            .unwrap();
        // claimed by a sender that died before the transport answered
        store
            .compare_and_set(
                appended[0].id,
                Expected::of(&appended[0]),
                EntryChange::Claim {
                    claimed_at: h.clock.now(),
                },
                h.clock.now(),
            )
            .await
            .unwrap()
            .unwrap();

        h.clock.advance(Duration::from_secs(5));
        let report = h.engine.sweep_stalled(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.examined, 0);

        h.clock.advance(Duration::from_secs(6));
        let report = h.engine.sweep_stalled(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.retried, 1);

        let entry = h.engine.entry(appended[0].id).await.unwrap().unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.last_error.as_deref(), Some(STALL_TIMEOUT_REASON));
        assert!(entry.linked_message_id.is_some());
        assert_eq!(h.transport.sent().await.len(), 1);
    }

    #[test]
    fn overlapping_send_registrations_are_counted() {
        let sends = SendsInProgress::default();
        let id = EntryId::from_ulid(ulid::Ulid::new());

        let first = sends.begin(id);
        let second = sends.begin(id);
        drop(first);
        assert!(sends.contains(id));
        drop(second);
        assert!(!sends.contains(id));
    }

    #[tokio::test]
    async fn sweep_ignores_recent_sends() {
        let h = harness(|b| b);
        h.engine
            .enqueue("user-1", "daily", texts(&["m1"]))
            .await
            .unwrap();

        h.clock.advance(Duration::from_secs(30));
        let report = h.engine.sweep_stalled(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.examined, 0);
    }
}
