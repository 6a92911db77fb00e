//! DeliveryTransport port - the SMS/MMS provider client.

use async_trait::async_trait;

use crate::domain::{DeliveryStatus, MessagePayload, ProviderMessageId, TransportError};

/// Sends one message to one recipient.
///
/// `send` returning `Ok` only means the provider accepted the message; the
/// actual outcome arrives later through a webhook (or `status`).
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(
        &self,
        recipient_id: &str,
        payload: &MessagePayload,
    ) -> Result<ProviderMessageId, TransportError>;

    /// Look up the fate of an accepted send.
    ///
    /// Used by the stall sweep to reconcile messages whose webhook never
    /// arrived. Transports without a lookup API keep the default.
    async fn status(
        &self,
        message_id: &ProviderMessageId,
    ) -> Result<DeliveryStatus, TransportError> {
        let _ = message_id;
        Ok(DeliveryStatus::Unknown)
    }
}
