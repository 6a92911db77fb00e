//! InMemoryTransport - a scriptable stand-in for the SMS provider.
//!
//! Records every send, hands out sequential provider ids, and lets callers
//! script failures, latency, and what a later status lookup reports.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{DeliveryStatus, MessagePayload, ProviderMessageId, TransportError};
use crate::ports::DeliveryTransport;

/// A message the transport accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: ProviderMessageId,
    pub recipient_id: String,
    pub payload: MessagePayload,
}

#[derive(Debug, Default)]
struct TransportState {
    sent: Vec<SentMessage>,

    /// Outcomes for upcoming sends, consumed front to back.
    scripted_failures: VecDeque<TransportError>,

    statuses: HashMap<ProviderMessageId, DeliveryStatus>,
}

/// In-process transport for development and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
    next_id: Arc<AtomicU64>,
    latency: Option<Duration>,
    attempts: Arc<AtomicU64>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `send` (and `status`) call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `send` fail with `error`. Calls queue up in order.
    pub async fn fail_next_send(&self, error: TransportError) {
        self.state.lock().await.scripted_failures.push_back(error);
    }

    /// What `status` reports for `message_id` from now on.
    pub async fn set_status(&self, message_id: &ProviderMessageId, status: DeliveryStatus) {
        self.state
            .lock()
            .await
            .statuses
            .insert(message_id.clone(), status);
    }

    /// Accepted sends, in order.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn last_sent(&self) -> Option<SentMessage> {
        self.state.lock().await.sent.last().cloned()
    }

    /// Every `send` call, including failed ones.
    pub fn send_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for InMemoryTransport {
    async fn send(
        &self,
        recipient_id: &str,
        payload: &MessagePayload,
    ) -> Result<ProviderMessageId, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = ProviderMessageId::new(format!("SM{n:06}"));
        state.sent.push(SentMessage {
            message_id: message_id.clone(),
            recipient_id: recipient_id.to_string(),
            payload: payload.clone(),
        });
        Ok(message_id)
    }

    async fn status(
        &self,
        message_id: &ProviderMessageId,
    ) -> Result<DeliveryStatus, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.state.lock().await;
        Ok(state
            .statuses
            .get(message_id)
            .cloned()
            .unwrap_or(DeliveryStatus::Unknown))
    }
}
