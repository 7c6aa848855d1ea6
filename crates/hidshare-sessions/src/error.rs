use crate::types::SessionId;

/// Errors returned by the session arbiter.
///
/// Every variant is a typed result delivered to the requesting client —
/// never a panic across the request boundary. Acquire/release failures are
/// retryable (re-enumerate, re-acquire).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The path was not present in the last enumeration pass.
    #[error("unknown device path '{0}'")]
    UnknownPath(String),

    /// The path has an outstanding intent or is owned by another session.
    #[error("device path '{0}' is busy")]
    PathBusy(String),

    /// A done-call referenced a session that does not match the pending
    /// reservation for the path.
    #[error("session {session} does not match the reservation on '{path}'")]
    SessionMismatch { path: String, session: SessionId },

    /// The session id no longer exists (released or invalidated by a
    /// disconnect).
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The caller issued a request before `handshake`.
    #[error("caller has not completed handshake")]
    Uninitialized,

    /// The arbiter replied with a response variant the issuing method did
    /// not expect. Indicates a protocol bug, not a caller error.
    #[error("unexpected response variant from arbiter")]
    UnexpectedResponse,

    /// The arbiter task is gone and can no longer serve requests.
    #[error("sessions background closed")]
    BackgroundClosed,
}

pub type Result<T> = std::result::Result<T, SessionError>;
