//! Error types for the testkit.

use thiserror::Error;

/// Result type for testkit operations.
pub type TestkitResult<T> = Result<T, TestkitError>;

/// Errors raised by the test server and helpers.
#[derive(Error, Debug)]
pub enum TestkitError {
    /// No state has been set for the resource.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A client message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] shared_reducer_protocol::ProtocolError),

    /// Socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An awaited event did not happen in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// An event stream ended.
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}
