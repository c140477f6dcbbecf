//! Error types for the session layer.

use beanwire_transport::SessionId;

/// Errors from looking up or writing to a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No open session has this id. It was never opened, or it was
    /// closed and removed already.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session was closed and no longer accepts writes.
    #[error("session {0} is closed")]
    Closed(SessionId),
}
