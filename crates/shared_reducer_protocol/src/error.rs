//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while mapping JSON values to protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message was valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    /// The object carried none of the known message keys.
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// A known field was present but could not be decoded.
    #[error("malformed field `{field}`: {message}")]
    Malformed {
        /// Name of the offending field.
        field: &'static str,
        /// Decoder message.
        message: String,
    },

    /// JSON conversion failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(field: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            field,
            message: err.to_string(),
        }
    }
}
