//! Shared fixtures for Courier benchmarks.

use tenvis_courier_core::{Engine, EngineConfig};

/// Build an engine holding `conversations` conversations with
/// `messages_per_conversation` messages each, interleaved in time.
#[must_use]
pub fn seeded_engine(conversations: usize, messages_per_conversation: usize) -> Engine {
    seeded_engine_with_config(
        conversations,
        messages_per_conversation,
        EngineConfig::default(),
    )
}

/// Same as [`seeded_engine`] with a custom configuration.
///
/// # Panics
///
/// Panics if `config` rejects the seed messages (for example a text limit
/// below the payload length).
#[must_use]
pub fn seeded_engine_with_config(
    conversations: usize,
    messages_per_conversation: usize,
    config: EngineConfig,
) -> Engine {
    let engine = Engine::with_config(config);
    let mut ts = 0.0;
    for _ in 0..messages_per_conversation {
        for c in 0..conversations {
            ts += 1.0;
            engine
                .submit_message(&conversation_name(c), "bench", "payload", Some(ts))
                .expect("seed message is valid");
        }
    }
    engine
}

/// Name of the `i`th benchmark conversation.
#[must_use]
pub fn conversation_name(i: usize) -> String {
    format!("conversation:{}", i)
}
