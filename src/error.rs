// ABOUTME: Defines the error type for the session coordinator using thiserror.
// ABOUTME: Covers waiter rejection, grant misuse, cancellation, and config parsing.

/// Errors surfaced by the session coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The session was cleared while this request was still waiting in its queue.
    ///
    /// Terminal for the request: the work must not run.
    #[error("session {key} was cleared while requests were pending")]
    SessionCleared { key: String },

    #[error("session key must not be empty")]
    EmptyKey,

    /// A token-checked release did not match the session's current holder.
    #[error("grant does not hold the lock on session {key}")]
    NotHolder { key: String },

    #[error("operation cancelled")]
    Cancelled,

    /// The waiter's completion was dropped without being signalled.
    #[error("waiter for session {key} was abandoned by the coordinator")]
    Abandoned { key: String },

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Returns true if this error means the session was cleared under the request.
    pub fn is_session_cleared(&self) -> bool {
        matches!(self, CoordinatorError::SessionCleared { .. })
    }
}
