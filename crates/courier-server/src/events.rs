//! WebSocket event protocol.
//!
//! Events travel as JSON text frames tagged by an `event` field:
//!
//! ```json
//! {"event": "join_conversation", "conversationId": "lobby"}
//! {"event": "new_message", "conversationId": "lobby", "sender": "ann", "text": "hi"}
//! ```

use serde::{Deserialize, Serialize};
use tenvis_courier_core::StoredMessage;
use thiserror::Error;

/// Event decoding errors.
#[derive(Debug, Error)]
pub enum EventError {
    /// Frame was not a known event.
    #[error("Malformed event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    Binary,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start receiving a conversation's messages.
    #[serde(rename_all = "camelCase")]
    JoinConversation { conversation_id: String },

    /// Stop receiving a conversation's messages.
    #[serde(rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },

    /// Submit a message.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        #[serde(default)]
        sender: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was stored in a joined conversation.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        text: String,
        sender: String,
        timestamp: f64,
    },

    /// Join acknowledged.
    #[serde(rename_all = "camelCase")]
    Joined { conversation_id: String },

    /// Leave acknowledged.
    #[serde(rename_all = "camelCase")]
    Left { conversation_id: String },

    /// A request failed.
    Error { message: String },
}

impl ServerEvent {
    /// Create an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&StoredMessage> for ServerEvent {
    fn from(stored: &StoredMessage) -> Self {
        Self::NewMessage {
            conversation_id: stored.conversation_id.clone(),
            text: stored.message.text.clone(),
            sender: stored.message.sender.clone(),
            timestamp: stored.message.timestamp,
        }
    }
}

/// Decode a client text frame.
///
/// # Errors
///
/// Returns an error if the frame is not a known event.
pub fn decode(text: &str) -> Result<ClientEvent, EventError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenvis_courier_core::Message;

    #[test]
    fn test_decode_client_events() {
        assert_eq!(
            decode(r#"{"event":"join_conversation","conversationId":"lobby"}"#).unwrap(),
            ClientEvent::JoinConversation {
                conversation_id: "lobby".to_string()
            }
        );

        assert_eq!(
            decode(r#"{"event":"new_message","conversationId":"lobby","sender":"ann","text":"hi"}"#)
                .unwrap(),
            ClientEvent::NewMessage {
                conversation_id: "lobby".to_string(),
                sender: "ann".to_string(),
                text: "hi".to_string(),
                timestamp: None,
            }
        );
    }

    #[test]
    fn test_decode_missing_fields_default_empty() {
        // Missing sender/text are left for engine validation to reject.
        let event = decode(r#"{"event":"new_message","conversationId":"lobby"}"#).unwrap();
        assert!(matches!(
            event,
            ClientEvent::NewMessage { ref sender, ref text, .. } if sender.is_empty() && text.is_empty()
        ));
    }

    #[test]
    fn test_decode_rejects_unknown() {
        assert!(decode(r#"{"event":"dance"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_server_event_encoding() {
        let stored = StoredMessage {
            conversation_id: "lobby".to_string(),
            message: Message::new("ann", "hi", 12.5),
        };

        let encoded = ServerEvent::from(&stored).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "new_message",
                "conversationId": "lobby",
                "text": "hi",
                "sender": "ann",
                "timestamp": 12.5
            })
        );

        let encoded = ServerEvent::error("nope").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"event": "error", "message": "nope"}));
    }
}
