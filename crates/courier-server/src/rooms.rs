//! Conversation rooms for live fan-out.
//!
//! A room is the set of sockets that joined one conversation. Each room owns
//! a broadcast channel; the [`Rooms`] registry is registered with the engine
//! as a notification sink and forwards every stored message to its room.

use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;
use tenvis_courier_core::{ConversationId, NotificationSink, SinkError, StoredMessage};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Room errors.
#[derive(Debug, Error, PartialEq)]
pub enum RoomError {
    /// Empty conversation id.
    #[error("Conversation id cannot be empty")]
    EmptyConversation,

    /// Not a member of the room.
    #[error("Not joined to conversation: {0}")]
    NotJoined(String),

    /// Already a member of the room.
    #[error("Already joined to conversation: {0}")]
    AlreadyJoined(String),

    /// Maximum joined rooms reached.
    #[error("Maximum joined conversations reached")]
    MaxRoomsReached,
}

/// Sockets listening to one conversation.
#[derive(Debug)]
struct Room {
    sender: broadcast::Sender<Arc<StoredMessage>>,
    members: HashSet<String>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            members: HashSet::new(),
        }
    }
}

/// Registry of rooms keyed by conversation id.
#[derive(Debug)]
pub struct Rooms {
    rooms: DashMap<ConversationId, Room>,
    /// Connection memberships (connection_id -> joined conversations).
    memberships: DashMap<String, DashSet<ConversationId>>,
    capacity: usize,
    max_rooms_per_connection: usize,
}

impl Rooms {
    /// Create an empty registry.
    #[must_use]
    pub fn new(capacity: usize, max_rooms_per_connection: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            capacity,
            max_rooms_per_connection,
        }
    }

    /// Join a connection to a conversation's room.
    ///
    /// Returns a receiver for messages stored in that conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, the connection already joined,
    /// or it has reached its room limit.
    pub fn join(
        &self,
        connection_id: &str,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<Arc<StoredMessage>>, RoomError> {
        if conversation_id.trim().is_empty() {
            return Err(RoomError::EmptyConversation);
        }

        let joined = self
            .memberships
            .entry(connection_id.to_string())
            .or_default();

        if joined.contains(conversation_id) {
            return Err(RoomError::AlreadyJoined(conversation_id.to_string()));
        }
        if joined.len() >= self.max_rooms_per_connection {
            return Err(RoomError::MaxRoomsReached);
        }

        let mut room = self
            .rooms
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating room");
                Room::new(self.capacity)
            });

        room.members.insert(connection_id.to_string());
        joined.insert(conversation_id.to_string());

        debug!(
            conversation = %conversation_id,
            connection = %connection_id,
            members = room.members.len(),
            "Joined conversation"
        );

        Ok(room.sender.subscribe())
    }

    /// Remove a connection from a conversation's room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection had not joined.
    pub fn leave(&self, connection_id: &str, conversation_id: &str) -> Result<(), RoomError> {
        let removed = self
            .memberships
            .get(connection_id)
            .and_then(|joined| joined.remove(conversation_id))
            .is_some();
        if !removed {
            return Err(RoomError::NotJoined(conversation_id.to_string()));
        }

        self.remove_member(connection_id, conversation_id);
        debug!(conversation = %conversation_id, connection = %connection_id, "Left conversation");
        Ok(())
    }

    /// Remove a connection from every room it joined.
    pub fn leave_all(&self, connection_id: &str) {
        if let Some((_, joined)) = self.memberships.remove(connection_id) {
            for conversation_id in joined.iter() {
                self.remove_member(connection_id, conversation_id.as_str());
            }
        }
        debug!(connection = %connection_id, "Left all conversations");
    }

    fn remove_member(&self, connection_id: &str, conversation_id: &str) {
        // Empty rooms are dropped; a later join recreates them.
        self.rooms.remove_if_mut(conversation_id, |_, room| {
            room.members.remove(connection_id);
            room.members.is_empty()
        });
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn member_count(&self, conversation_id: &str) -> usize {
        self.rooms
            .get(conversation_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    /// Conversations a connection has joined.
    #[must_use]
    pub fn joined(&self, connection_id: &str) -> Vec<ConversationId> {
        self.memberships
            .get(connection_id)
            .map(|joined| joined.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl NotificationSink for Rooms {
    fn notify(&self, conversation_id: &str, message: &StoredMessage) -> Result<(), SinkError> {
        let Some(room) = self.rooms.get(conversation_id) else {
            return Ok(());
        };
        // A send error only means nobody is receiving right now.
        let recipients = room.sender.send(Arc::new(message.clone())).unwrap_or_default();
        trace!(conversation = %conversation_id, recipients, "Fanned out message");
        Ok(())
    }
}
