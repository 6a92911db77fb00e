//! Message payload carried by a queue entry.

use serde::{Deserialize, Serialize};

/// Content of one outbound message: text plus optional media references.
///
/// The engine never inspects this; it is handed to the transport as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,

    /// Media URLs (MMS attachments).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media.push(url.into());
        self
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_payload_omits_media_when_serialized() {
        let json = serde_json::to_value(MessagePayload::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "hi" }));
    }

    #[test]
    fn media_payload_deserializes() {
        let payload: MessagePayload = serde_json::from_value(serde_json::json!({
            "text": "today's plan",
            "media": ["https://cdn.example.com/plan.png"],
        }))
        .unwrap();

        assert!(payload.has_media());
        assert_eq!(
            payload,
            MessagePayload::text("today's plan").with_media("https://cdn.example.com/plan.png")
        );
    }
}
