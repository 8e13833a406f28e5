//! Error types for the experience engine.
//!
//! Construction-time and navigation errors abort the current play call and
//! surface to the caller. Backend-protocol failures with a safe degraded
//! result (timeouts, unknown tools) are absorbed where they occur and never
//! appear here.

use thiserror::Error;

/// Main error type for the experience engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed experience template: empty scenes, empty events, empty
    /// cast, or a starting location that points outside the graph. Fatal;
    /// the experience is never constructed.
    #[error("Invalid experience template: {0}")]
    Validation(String),

    /// An id that should reference a known experience, scene, event, or
    /// cast member does not. Fatal to the current request only.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An event carries an action kind this engine does not process.
    #[error("Unrecognized event action: {0}")]
    UnrecognizedAction(String),

    /// A dialog payload carries a resolution type this engine does not
    /// process.
    #[error("Unrecognized dialog type: {0}")]
    UnrecognizedDialogType(String),

    /// The cast member driving a prompt dialog has no bound LLM identity.
    #[error("Cast member {0} has no bound LLM identity")]
    UnboundCastMember(String),

    /// The backend returned no usable reply for a consultation.
    #[error("Backend returned no messages on thread {0}")]
    EmptyReply(String),

    /// The evaluator's reply could not be parsed as structured data, even
    /// after the single salvage pass.
    #[error("Could not parse evaluator reply: {0}")]
    Parse(String),

    /// A thread conflict that survived the one automatic cancel-and-retry.
    #[error("Thread conflict persisted after retry: {0}")]
    Conflict(String),

    /// Error from the backend client.
    #[error("Backend error: {0}")]
    Backend(#[from] assistants::Error),

    /// Error from a persistence collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
