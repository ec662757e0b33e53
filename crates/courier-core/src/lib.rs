//! # courier-core
//!
//! Conversation indexing and message ordering for the Courier chat server.
//!
//! This crate provides the in-memory building blocks:
//!
//! - **MessageStore** - One append-only log per conversation
//! - **ConversationIndex** - Every conversation ordered by last activity
//! - **Engine** - Append-and-reindex coordination behind a small API
//! - **Sinks** - Hooks the transport layer uses to fan messages out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────────┐
//! │   Engine    │────▶│ MessageStore │────▶│ ConversationIndex │
//! └─────────────┘     └──────────────┘     └───────────────────┘
//!                                                   │
//!                                                   ▼
//!                                          ┌───────────────────┐
//!                                          │ NotificationSink  │
//!                                          └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tenvis_courier_core::Engine;
//!
//! let engine = Engine::new();
//! engine.submit_message("lobby", "alice", "hi", Some(10.0)).unwrap();
//! engine.submit_message("support", "bob", "yo", Some(20.0)).unwrap();
//!
//! let active = engine.list_conversations();
//! assert_eq!(active[0].id, "support");
//!
//! let history = engine.list_messages("lobby", None);
//! assert_eq!(history[0].text, "hi");
//! ```

pub mod engine;
pub mod index;
pub mod message;
pub mod sink;
pub mod store;

pub use engine::{Engine, EngineConfig, EngineStats};
pub use index::{ConversationIndex, TouchOutcome};
pub use message::{ConversationId, ConversationMeta, InvalidMessage, Message, StoredMessage};
pub use sink::{NotificationSink, SinkError, SinkId, Sinks};
pub use store::{AppendResult, ConversationLog, MessageStore};
