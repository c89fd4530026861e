//! Error types for the shared reducer.

use shared_reducer_protocol::ProtocolError;
use thiserror::Error;

/// Result type for shared reducer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while dispatching or synchronising.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Invalid configuration, detected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `dispatch` was called from inside a generator or a synchronously
    /// invoked sync callback.
    #[error("cannot dispatch recursively")]
    ReentrantDispatch,

    /// The server rejected a change.
    #[error("change rejected by server: {0}")]
    Rejected(String),

    /// The reducer has been closed.
    #[error("shared reducer is closed")]
    Closed,

    /// The connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Outbound message could not be handed to the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound message did not match the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl SyncError {
    /// Returns true if this error ends the reducer instance.
    ///
    /// There is no reconnection: a lost connection is terminal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::Closed)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(SyncError::Connection("Failed to connect".into()).is_fatal());
        assert!(SyncError::Closed.is_fatal());
        assert!(!SyncError::Rejected("Cannot modify data".into()).is_fatal());
        assert!(!SyncError::ReentrantDispatch.is_fatal());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            SyncError::ReentrantDispatch.to_string(),
            "cannot dispatch recursively"
        );
        let err = SyncError::Rejected("Cannot modify data".into());
        assert!(err.to_string().contains("Cannot modify data"));
    }

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::UnknownMessage("{}".into()).into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
