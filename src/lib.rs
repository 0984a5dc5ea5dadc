//! Terminal chat over a local causal language model.
//!
//! Keeps a sliding window of recent turns, renders them into a ChatML prompt,
//! streams the model's continuation to the terminal and cleans it into the
//! reply that is stored as history.

pub mod conversation;
pub mod error;
pub mod generation;
pub mod logging;
pub mod prompt;
pub mod reply;
pub mod session;
pub mod settings;
pub mod stop_conditions;

// Real llama.cpp engine when built with the `llama` feature
#[cfg(feature = "llama")]
pub mod chat;
#[cfg(feature = "llama")]
pub use chat::ChatEngine;

// Scripted engine otherwise
#[cfg(not(feature = "llama"))]
pub mod chat_mock;
#[cfg(not(feature = "llama"))]
pub use chat_mock::ChatEngine;

pub use conversation::{ConversationBuffer, Role, Turn};
pub use error::{ConversationError, GenerationError, SettingsError};
pub use generation::{ChunkSink, GenerationAdapter, GenerationRequest, ReplyStream};
pub use prompt::build_prompt;
pub use reply::clean_reply;
pub use session::ChatSession;
pub use settings::ChatSettings;
