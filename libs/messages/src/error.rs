//! Error types for message encoding.

use thiserror::Error;

/// Errors that can occur when encoding or decoding bus payloads.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is malformed or misses a required field.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}
