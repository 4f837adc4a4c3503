// src/error.rs
// Error taxonomy for the chat pipeline

use thiserror::Error;

/// Errors surfaced by the conversation pipeline.
///
/// Only `EmptyInput` and `QuotaExceeded` are pre-flight: they are returned
/// synchronously before any network call. Everything else is detected mid- or
/// post-flight and handled by degrading rather than unwinding conversation state.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Nothing to submit after prompt assembly (no text, no files, no selections).
    #[error("nothing to submit")]
    EmptyInput,

    /// Daily usage budget exhausted; submission refused.
    #[error("daily usage limit of {limit} words reached")]
    QuotaExceeded { limit: usize },

    /// Network/HTTP failure mid-stream. Partial content is retained by the caller.
    #[error("stream transport failure: {0}")]
    StreamTransport(String),

    /// Clean user-triggered cancellation. Not a failure.
    #[error("stream aborted by user")]
    Aborted,

    /// Lookup collaborator failure. Non-fatal; callers degrade to empty results.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// Persistence collaborator failure. The in-memory conversation continues unaffected.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl ChatError {
    pub fn lookup(err: impl std::fmt::Display) -> Self {
        ChatError::Lookup(err.to_string())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        ChatError::Persistence(err.to_string())
    }
}
