use thiserror::Error;

/// Errors raised by the conversation buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// Role string outside `user` / `assistant`.
    #[error("invalid role '{0}': expected 'user' or 'assistant'")]
    InvalidRole(String),
}

/// Errors produced while generating a reply.
///
/// None of these abort a chat session: the session logs them and falls back
/// to a non-streaming generation request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation backend failed: {0}")]
    Backend(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("generation worker panicked")]
    WorkerPanicked,
    #[error("generation produced no output")]
    EmptyOutput,
}

/// Errors loading [`crate::settings::ChatSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
