//! Recency index over all conversations.
//!
//! Conversations are kept in a [`BTreeMap`] ordered by last message time,
//! descending, with ties broken by the order in which each conversation was
//! first touched. A side map from conversation id to its current key makes
//! repositioning O(log n) without scanning.

use crate::message::{ConversationId, ConversationMeta};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

/// Ordering key: newer first, then first-touch order.
#[derive(Debug, Clone, Copy)]
struct RecencyKey {
    last_message_time: f64,
    seq: u64,
}

impl Ord for RecencyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .last_message_time
            .total_cmp(&self.last_message_time)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for RecencyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RecencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RecencyKey {}

/// What a [`ConversationIndex::touch`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchOutcome {
    /// First message for this conversation.
    Inserted,
    /// Moved to a newer position.
    Advanced {
        /// Last message time before the touch.
        previous: f64,
    },
    /// Same timestamp as before; position unchanged.
    Unchanged,
    /// Older than the recorded time; the recorded time was kept.
    Clamped {
        /// Recorded time that was kept.
        kept: f64,
        /// Timestamp that was refused.
        rejected: f64,
    },
    /// Non-finite timestamp; nothing changed.
    Ignored,
}

impl TouchOutcome {
    /// Whether an out-of-order timestamp was clamped.
    #[must_use]
    pub fn is_clamped(&self) -> bool {
        matches!(self, Self::Clamped { .. })
    }
}

#[derive(Debug, Default)]
struct IndexInner {
    order: BTreeMap<RecencyKey, ConversationId>,
    keys: HashMap<ConversationId, RecencyKey>,
    next_seq: u64,
}

/// Globally ordered view of conversations by recency.
///
/// Writers take the lock exclusively for the duration of one touch; readers
/// share it while copying a snapshot.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    inner: RwLock<IndexInner>,
}

impl ConversationIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record activity on a conversation at `timestamp`.
    ///
    /// New conversations are inserted at their position; known ones are
    /// removed and reinserted under the new key. Last message time never
    /// moves backwards: an older timestamp is clamped to the recorded one.
    pub fn touch(&self, conversation_id: &str, timestamp: f64) -> TouchOutcome {
        if !timestamp.is_finite() {
            warn!(conversation = %conversation_id, timestamp, "Ignoring non-finite timestamp");
            return TouchOutcome::Ignored;
        }
        // -0.0 and 0.0 are the same instant; `total_cmp` would split them.
        let timestamp = timestamp + 0.0;

        let mut inner = self.write();

        let Some(current) = inner.keys.get(conversation_id).copied() else {
            let key = RecencyKey {
                last_message_time: timestamp,
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            inner.order.insert(key, conversation_id.to_string());
            inner.keys.insert(conversation_id.to_string(), key);
            debug!(conversation = %conversation_id, timestamp, "Indexed new conversation");
            return TouchOutcome::Inserted;
        };

        if timestamp < current.last_message_time {
            warn!(
                conversation = %conversation_id,
                kept = current.last_message_time,
                rejected = timestamp,
                "Out-of-order timestamp clamped"
            );
            return TouchOutcome::Clamped {
                kept: current.last_message_time,
                rejected: timestamp,
            };
        }

        if timestamp == current.last_message_time {
            return TouchOutcome::Unchanged;
        }

        // The ordering key changed, so this is a remove and reinsert.
        let id = inner
            .order
            .remove(&current)
            .unwrap_or_else(|| conversation_id.to_string());
        let key = RecencyKey {
            last_message_time: timestamp,
            seq: current.seq,
        };
        inner.order.insert(key, id);
        if let Some(slot) = inner.keys.get_mut(conversation_id) {
            *slot = key;
        }

        trace!(conversation = %conversation_id, timestamp, "Repositioned conversation");
        TouchOutcome::Advanced {
            previous: current.last_message_time,
        }
    }

    /// All conversations, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationMeta> {
        self.read()
            .order
            .iter()
            .map(|(key, id)| ConversationMeta {
                id: id.clone(),
                last_message_time: key.last_message_time,
            })
            .collect()
    }

    /// Metadata for one conversation.
    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<ConversationMeta> {
        self.read()
            .keys
            .get(conversation_id)
            .map(|key| ConversationMeta {
                id: conversation_id.to_string(),
                last_message_time: key.last_message_time,
            })
    }

    /// Number of indexed conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().keys.len()
    }

    /// Check if no conversation has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(index: &ConversationIndex) -> Vec<String> {
        index.snapshot().into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_index_orders_by_recency() {
        let index = ConversationIndex::new();

        assert_eq!(index.touch("c1", 10.0), TouchOutcome::Inserted);
        assert_eq!(index.touch("c2", 20.0), TouchOutcome::Inserted);
        assert_eq!(index.touch("c3", 15.0), TouchOutcome::Inserted);

        assert_eq!(ids(&index), vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn test_index_repositions_on_touch() {
        let index = ConversationIndex::new();
        index.touch("c1", 10.0);
        index.touch("c2", 20.0);

        assert_eq!(
            index.touch("c1", 30.0),
            TouchOutcome::Advanced { previous: 10.0 }
        );

        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "c1");
        assert_eq!(snapshot[0].last_message_time, 30.0);
        assert_eq!(snapshot[1].id, "c2");
        assert_eq!(snapshot[1].last_message_time, 20.0);
    }

    #[test]
    fn test_index_clamps_older_timestamp() {
        let index = ConversationIndex::new();
        index.touch("c1", 50.0);
        index.touch("c2", 40.0);

        let outcome = index.touch("c1", 5.0);
        assert!(outcome.is_clamped());
        assert_eq!(
            outcome,
            TouchOutcome::Clamped {
                kept: 50.0,
                rejected: 5.0
            }
        );

        assert_eq!(index.get("c1").map(|m| m.last_message_time), Some(50.0));
        assert_eq!(ids(&index), vec!["c1", "c2"]);
    }

    #[test]
    fn test_index_ties_keep_first_touch_order() {
        let index = ConversationIndex::new();
        index.touch("a", 10.0);
        index.touch("b", 10.0);
        index.touch("c", 10.0);
        assert_eq!(ids(&index), vec!["a", "b", "c"]);

        // Moving "c" then "a" to the same newer time keeps first-touch order.
        index.touch("c", 20.0);
        index.touch("a", 20.0);
        assert_eq!(ids(&index), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_index_signed_zero_is_a_tie() {
        let index = ConversationIndex::new();
        assert_eq!(index.touch("first", -0.0), TouchOutcome::Inserted);
        assert_eq!(index.touch("second", 0.0), TouchOutcome::Inserted);
        assert_eq!(ids(&index), vec!["first", "second"]);

        assert_eq!(index.touch("first", 0.0), TouchOutcome::Unchanged);
        assert!(index.get("first").unwrap().last_message_time.is_sign_positive());
    }

    #[test]
    fn test_index_same_timestamp_is_unchanged() {
        let index = ConversationIndex::new();
        index.touch("c1", 10.0);
        assert_eq!(index.touch("c1", 10.0), TouchOutcome::Unchanged);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_index_ignores_non_finite() {
        let index = ConversationIndex::new();
        assert_eq!(index.touch("c1", f64::NAN), TouchOutcome::Ignored);
        assert!(index.is_empty());
        assert!(index.get("c1").is_none());
    }

    #[test]
    fn test_index_snapshot_is_idempotent() {
        let index = ConversationIndex::new();
        index.touch("c1", 1.0);
        index.touch("c2", 2.0);
        index.touch("c1", 3.0);

        assert_eq!(index.snapshot(), index.snapshot());
    }

    #[test]
    fn test_index_many_conversations() {
        let index = ConversationIndex::new();
        for i in 0..100 {
            index.touch(&format!("c{}", i), f64::from(i));
        }
        // Bump the oldest to the top.
        index.touch("c0", 1000.0);

        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot[0].id, "c0");
        assert_eq!(snapshot[1].id, "c99");
        assert_eq!(snapshot[99].id, "c1");
        assert!(snapshot
            .windows(2)
            .all(|w| w[0].last_message_time >= w[1].last_message_time));
    }
}
