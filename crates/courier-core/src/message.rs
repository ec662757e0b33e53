//! Message records and inbound validation for Courier.
//!
//! Messages are immutable once they are stored; everything that reaches a
//! conversation log has passed through [`Draft::validate`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A conversation identifier.
pub type ConversationId = String;

/// Default maximum conversation id length.
pub const MAX_CONVERSATION_ID_LENGTH: usize = 256;

/// Default maximum sender length.
pub const MAX_SENDER_LENGTH: usize = 256;

/// Default maximum text length in bytes.
pub const MAX_TEXT_LENGTH: usize = 64 * 1024;

/// Current time as seconds since the UNIX epoch.
#[must_use]
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Reasons a submission is rejected before it touches any state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidMessage {
    /// Conversation id is empty.
    #[error("Missing conversation id")]
    MissingConversationId,

    /// Sender is empty.
    #[error("Missing sender")]
    MissingSender,

    /// Text is empty.
    #[error("Missing text")]
    MissingText,

    /// Timestamp is NaN or infinite.
    #[error("Timestamp must be a finite number, got {0}")]
    InvalidTimestamp(f64),

    /// A field exceeds its configured length.
    #[error("Field '{field}' exceeds maximum length of {max}")]
    TooLong {
        /// Offending field.
        field: &'static str,
        /// Configured limit.
        max: usize,
    },
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message body.
    pub text: String,
    /// Seconds since the UNIX epoch.
    pub timestamp: f64,
    /// Sender name.
    pub sender: String,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(sender: impl Into<String>, text: impl Into<String>, timestamp: f64) -> Self {
        Self {
            text: text.into(),
            timestamp,
            sender: sender.into(),
        }
    }
}

/// A message together with the conversation it was stored in.
///
/// This is what submitters get back and what notification sinks receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// The message as appended to the log.
    #[serde(flatten)]
    pub message: Message,
}

/// Recency metadata for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Timestamp of the most recent message (never decreases).
    pub last_message_time: f64,
}

/// Field length limits applied during validation.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum conversation id length.
    pub max_conversation_id_length: usize,
    /// Maximum sender length.
    pub max_sender_length: usize,
    /// Maximum text length.
    pub max_text_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_conversation_id_length: MAX_CONVERSATION_ID_LENGTH,
            max_sender_length: MAX_SENDER_LENGTH,
            max_text_length: MAX_TEXT_LENGTH,
        }
    }
}

/// An inbound submission that has not been validated yet.
#[derive(Debug, Clone)]
pub struct Draft<'a> {
    /// Target conversation.
    pub conversation_id: &'a str,
    /// Sender name.
    pub sender: &'a str,
    /// Message body.
    pub text: &'a str,
    /// Caller supplied timestamp, if any.
    pub timestamp: Option<f64>,
}

impl<'a> Draft<'a> {
    /// Create a new draft.
    #[must_use]
    pub fn new(
        conversation_id: &'a str,
        sender: &'a str,
        text: &'a str,
        timestamp: Option<f64>,
    ) -> Self {
        Self {
            conversation_id,
            sender,
            text,
            timestamp,
        }
    }

    /// Check required fields and limits.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, checked in field order.
    pub fn validate(&self, limits: &Limits) -> Result<(), InvalidMessage> {
        if self.conversation_id.trim().is_empty() {
            return Err(InvalidMessage::MissingConversationId);
        }
        if self.conversation_id.len() > limits.max_conversation_id_length {
            return Err(InvalidMessage::TooLong {
                field: "conversation_id",
                max: limits.max_conversation_id_length,
            });
        }
        if self.sender.trim().is_empty() {
            return Err(InvalidMessage::MissingSender);
        }
        if self.sender.len() > limits.max_sender_length {
            return Err(InvalidMessage::TooLong {
                field: "sender",
                max: limits.max_sender_length,
            });
        }
        if self.text.is_empty() {
            return Err(InvalidMessage::MissingText);
        }
        if self.text.len() > limits.max_text_length {
            return Err(InvalidMessage::TooLong {
                field: "text",
                max: limits.max_text_length,
            });
        }
        match self.timestamp {
            Some(ts) if !ts.is_finite() => Err(InvalidMessage::InvalidTimestamp(ts)),
            _ => Ok(()),
        }
    }

    /// Build the message, assigning `now` when no timestamp was supplied.
    #[must_use]
    pub fn into_message(self, now: f64) -> Message {
        // Adding 0.0 folds -0.0 into 0.0.
        Message::new(self.sender, self.text, self.timestamp.unwrap_or(now) + 0.0)
    }
}
