//! The conversation engine.
//!
//! The engine binds the [`MessageStore`] and the [`ConversationIndex`]
//! together and is the only surface transport code talks to.
//!
//! ## Locking
//!
//! A submission locks its conversation's log, appends, touches the index,
//! notifies sinks, then releases the log. Lock order is always
//! conversation log, then index; nothing takes them the other way round.
//! Holding the log across the index update means any reader that can see a
//! new message in the log also sees the index reflecting it, and two
//! submissions to the same conversation are fully serialized.

use crate::index::ConversationIndex;
use crate::message::{
    now_seconds, ConversationMeta, Draft, InvalidMessage, Limits, Message, StoredMessage,
    MAX_CONVERSATION_ID_LENGTH, MAX_SENDER_LENGTH, MAX_TEXT_LENGTH,
};
use crate::sink::{NotificationSink, SinkId, Sinks};
use crate::store::MessageStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Messages kept per conversation; `None` keeps everything.
    pub max_messages_per_conversation: Option<usize>,
    /// Maximum conversation id length.
    pub max_conversation_id_length: usize,
    /// Maximum sender length.
    pub max_sender_length: usize,
    /// Maximum text length in bytes.
    pub max_text_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: None,
            max_conversation_id_length: MAX_CONVERSATION_ID_LENGTH,
            max_sender_length: MAX_SENDER_LENGTH,
            max_text_length: MAX_TEXT_LENGTH,
        }
    }
}

impl EngineConfig {
    fn limits(&self) -> Limits {
        Limits {
            max_conversation_id_length: self.max_conversation_id_length,
            max_sender_length: self.max_sender_length,
            max_text_length: self.max_text_length,
        }
    }
}

/// Conversation store plus recency index.
pub struct Engine {
    store: MessageStore,
    index: ConversationIndex,
    sinks: Sinks,
    limits: Limits,
    clamped: AtomicU64,
    sink_failures: AtomicU64,
}

impl Engine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        info!("Creating engine with config: {:?}", config);
        Self {
            store: MessageStore::with_retention(config.max_messages_per_conversation),
            index: ConversationIndex::new(),
            sinks: Sinks::new(),
            limits: config.limits(),
            clamped: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Store a message and move its conversation to the front of the index.
    ///
    /// When `timestamp` is `None` the current time is assigned once the
    /// conversation is locked, so assigned times follow log order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMessage`] if a required field is missing, a field is
    /// too long, or the timestamp is not finite. Nothing is stored then.
    pub fn submit_message(
        &self,
        conversation_id: &str,
        sender: &str,
        text: &str,
        timestamp: Option<f64>,
    ) -> Result<StoredMessage, InvalidMessage> {
        let draft = Draft::new(conversation_id, sender, text, timestamp);
        draft.validate(&self.limits).map_err(|e| {
            debug!(conversation = %conversation_id, error = %e, "Rejected message");
            e
        })?;

        let (stored, appended, outcome) = self.store.append_with(
            conversation_id,
            || draft.into_message(now_seconds()),
            |message, appended| {
                let outcome = self.index.touch(conversation_id, appended.timestamp);
                if outcome.is_clamped() {
                    self.clamped.fetch_add(1, Ordering::Relaxed);
                }

                let stored = StoredMessage {
                    conversation_id: conversation_id.to_string(),
                    message,
                };

                let failures = self.sinks.notify_all(&stored);
                if failures > 0 {
                    self.sink_failures
                        .fetch_add(failures as u64, Ordering::Relaxed);
                }
                (stored, appended, outcome)
            },
        );

        trace!(
            conversation = %conversation_id,
            len = appended.len,
            evicted = appended.evicted,
            outcome = ?outcome,
            "Stored message"
        );

        Ok(stored)
    }

    /// All conversations, most recently active first.
    #[must_use]
    pub fn list_conversations(&self) -> Vec<ConversationMeta> {
        self.index.snapshot()
    }

    /// Messages of one conversation, newest first.
    ///
    /// Unknown conversations yield an empty list.
    #[must_use]
    pub fn list_messages(&self, conversation_id: &str, limit: Option<usize>) -> Vec<Message> {
        self.store.recent_messages(conversation_id, limit)
    }

    /// Recency metadata for a single conversation.
    #[must_use]
    pub fn conversation(&self, conversation_id: &str) -> Option<ConversationMeta> {
        self.index.get(conversation_id)
    }

    /// Register a sink called after each successful submission.
    pub fn on_message_stored(&self, sink: Arc<dyn NotificationSink>) -> SinkId {
        self.sinks.register(sink)
    }

    /// Unregister a sink.
    pub fn remove_sink(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    /// Get engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            conversation_count: self.index.len(),
            message_count: self.store.message_count(),
            clamped_timestamps: self.clamped.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of conversations with at least one message.
    pub conversation_count: usize,
    /// Retained messages across all conversations.
    pub message_count: usize,
    /// Submissions whose timestamp was older than the recorded recency.
    pub clamped_timestamps: u64,
    /// Failed sink deliveries.
    pub sink_failures: u64,
}
