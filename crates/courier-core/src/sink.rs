//! Notification sinks for stored messages.
//!
//! A sink is the transport layer's hook for fanning a stored message out to
//! whoever is interested in its conversation. Sinks are fire-and-forget: a
//! failing sink is logged and counted, and never undoes the store.

use crate::message::StoredMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors a sink may report.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's downstream is gone.
    #[error("Sink closed")]
    Closed,

    /// The sink refused the message.
    #[error("Delivery failed: {0}")]
    Failed(String),
}

/// Receives every successfully stored message.
///
/// Implementations must not block: they are called while the conversation's
/// log is locked, which keeps notifications in log order.
///
/// A sink must not submit to, or read from, the [`Engine`](crate::Engine) for
/// the conversation it is being notified about. The log mutex is not
/// re-entrant, so that call deadlocks the submitting thread.
pub trait NotificationSink: Send + Sync {
    /// Deliver a stored message.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed. The message stays stored.
    fn notify(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), SinkError>;
}

impl<F> NotificationSink for F
where
    F: Fn(&str, &StoredMessage) -> Result<(), SinkError> + Send + Sync,
{
    fn notify(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), SinkError> {
        self(conversation_id, message)
    }
}

/// Handle returned when registering a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Ordered set of registered sinks.
#[derive(Default)]
pub struct Sinks {
    entries: RwLock<Vec<(SinkId, Arc<dyn NotificationSink>)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks").field("count", &self.len()).finish()
    }
}

impl Sinks {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink. Sinks are notified in registration order.
    pub fn register(&self, sink: Arc<dyn NotificationSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));
        debug!(sink = %id, "Registered notification sink");
        id
    }

    /// Remove a sink. Returns `true` if it was registered.
    pub fn remove(&self, id: SinkId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(sink_id, _)| *sink_id != id);
        let removed = entries.len() != before;
        if removed {
            debug!(sink = %id, "Removed notification sink");
        }
        removed
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every sink, returning how many failed.
    pub fn notify_all(&self, message: &StoredMessage) -> usize {
        // Copy the handles out so a sink may register or remove sinks.
        let sinks: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (id, sink) in sinks {
            if let Err(e) = sink.notify(&message.conversation_id, message) {
                warn!(
                    sink = %id,
                    conversation = %message.conversation_id,
                    error = %e,
                    "Notification sink failed"
                );
                failures += 1;
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::Mutex;

    fn stored(conversation: &str, text: &str) -> StoredMessage {
        StoredMessage {
            conversation_id: conversation.to_string(),
            message: Message::new("alice", text, 1.0),
        }
    }

    #[test]
    fn test_sinks_notify_in_order() {
        let sinks = Sinks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            sinks.register(Arc::new(move |conv: &str, msg: &StoredMessage| -> Result<(), SinkError> {
                seen.lock()
                    .unwrap()
                    .push(format!("{}:{}:{}", name, conv, msg.message.text));
                Ok(())
            }));
        }

        assert_eq!(sinks.notify_all(&stored("c1", "hi")), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:c1:hi".to_string(), "second:c1:hi".to_string()]
        );
    }

    #[test]
    fn test_sinks_count_failures() {
        let sinks = Sinks::new();
        sinks.register(Arc::new(|_: &str, _: &StoredMessage| -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }));
        sinks.register(Arc::new(|_: &str, _: &StoredMessage| -> Result<(), SinkError> { Ok(()) }));

        assert_eq!(sinks.notify_all(&stored("c1", "hi")), 1);
    }

    #[test]
    fn test_sinks_remove() {
        let sinks = Sinks::new();
        let id = sinks.register(Arc::new(|_: &str, _: &StoredMessage| -> Result<(), SinkError> { Ok(()) }));

        assert_eq!(sinks.len(), 1);
        assert!(sinks.remove(id));
        assert!(!sinks.remove(id));
        assert!(sinks.is_empty());
    }
}
