//! Per-conversation message logs.
//!
//! Each conversation owns an append-only [`ConversationLog`] behind its own
//! mutex, so appends to unrelated conversations never contend. The map of
//! logs is a [`DashMap`]; its shard locks are only held long enough to find
//! or create a log handle.

use crate::message::{ConversationId, Message};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

type LogHandle = Arc<Mutex<ConversationLog>>;

/// Lock a log, recovering from poisoning.
///
/// Every mutation of a log is a single push/pop, so a panicking holder
/// cannot leave it half-written.
fn lock_log(handle: &LogHandle) -> MutexGuard<'_, ConversationLog> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of appending a message to a log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppendResult {
    /// Messages retained in the log after the append.
    pub len: usize,
    /// Messages evicted from the front by the retention bound.
    pub evicted: usize,
    /// Timestamp of the message just appended.
    pub timestamp: f64,
}

/// Ordered messages of a single conversation.
///
/// Stored oldest-first; newest-first reads walk the deque from the back,
/// so no reversal copy is made.
#[derive(Debug)]
pub struct ConversationLog {
    messages: VecDeque<Message>,
    retention: Option<usize>,
}

impl ConversationLog {
    /// Create an empty log with an optional retention bound.
    #[must_use]
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            messages: VecDeque::new(),
            // A bound of zero would drop the message that defines recency.
            retention: retention.map(|max| max.max(1)),
        }
    }

    /// Append a message, evicting the oldest ones past the retention bound.
    pub fn push(&mut self, message: Message) -> AppendResult {
        let timestamp = message.timestamp;
        self.messages.push_back(message);

        let mut evicted = 0;
        if let Some(max) = self.retention {
            while self.messages.len() > max {
                self.messages.pop_front();
                evicted += 1;
            }
        }

        AppendResult {
            len: self.messages.len(),
            evicted,
            timestamp,
        }
    }

    /// Newest-first view, capped at `limit` when given.
    pub fn recent(&self, limit: Option<usize>) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
    }
}

/// Store of all conversation logs.
#[derive(Debug, Default)]
pub struct MessageStore {
    logs: DashMap<ConversationId, LogHandle>,
    retention: Option<usize>,
    retained: AtomicUsize,
}

impl MessageStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `retention` messages per conversation.
    #[must_use]
    pub fn with_retention(retention: Option<usize>) -> Self {
        Self {
            logs: DashMap::new(),
            retention,
            retained: AtomicUsize::new(0),
        }
    }

    /// Get the log for a conversation, creating it if absent.
    fn log(&self, conversation_id: &str) -> LogHandle {
        if let Some(handle) = self.logs.get(conversation_id) {
            return Arc::clone(handle.value());
        }

        let handle = self
            .logs
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating conversation log");
                Arc::new(Mutex::new(ConversationLog::new(self.retention)))
            });
        Arc::clone(handle.value())
    }

    /// Append a message to a conversation's log.
    pub fn append(&self, conversation_id: &str, message: Message) -> AppendResult {
        self.append_with(conversation_id, || message, |_, result| result)
    }

    /// Append a message and run `then` before the log is unlocked.
    ///
    /// `build` is called once the log lock is held, so anything it reads
    /// (such as the current time) is ordered with the log. `then` receives
    /// the stored message and the append result; no other append or read of
    /// this conversation can observe the log until it returns.
    pub fn append_with<R>(
        &self,
        conversation_id: &str,
        build: impl FnOnce() -> Message,
        then: impl FnOnce(Message, AppendResult) -> R,
    ) -> R {
        let handle = self.log(conversation_id);
        let mut log = lock_log(&handle);

        let message = build();
        let result = log.push(message.clone());
        self.retained.fetch_add(1, Ordering::Relaxed);
        if result.evicted > 0 {
            self.retained.fetch_sub(result.evicted, Ordering::Relaxed);
        }
        trace!(conversation = %conversation_id, len = result.len, "Appended message");

        then(message, result)
    }

    /// Messages of a conversation, newest first.
    ///
    /// Unknown conversations yield an empty list.
    #[must_use]
    pub fn recent_messages(&self, conversation_id: &str, limit: Option<usize>) -> Vec<Message> {
        let Some(handle) = self.logs.get(conversation_id).map(|h| Arc::clone(h.value())) else {
            return Vec::new();
        };
        let log = lock_log(&handle);
        log.recent(limit).cloned().collect()
    }

    /// Total retained messages across all conversations.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.retained.load(Ordering::Relaxed)
    }
}
