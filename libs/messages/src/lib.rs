//! Wire contract between the provisioner and its worker nodes.
//!
//! Every message on the bus is a JSON record. Required fields are plain
//! struct fields; optional ones are `Option`s skipped when absent, so a
//! reply missing a required field fails to decode instead of being
//! silently defaulted.
//!
//! - [`subjects`]: subject naming, parameterized by service name and node id
//! - [`types`]: request / reply payloads
//! - [`handle`]: canonical instance and binding handles
//! - [`codes`]: error codes surfaced to external callers

pub mod codes;
mod error;
pub mod handle;
pub mod subjects;
pub mod types;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

pub use codes::{ErrorCode, ErrorPayload, ErrorResponse};
pub use error::MessageError;
pub use handle::{Credentials, HandleKind, ServiceHandle};
pub use subjects::Subjects;

/// Encode a payload for publishing.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, MessageError> {
    let body = serde_json::to_vec(message).map_err(MessageError::Encode)?;
    Ok(Bytes::from(body))
}

/// Decode a payload received from the bus.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, MessageError> {
    serde_json::from_slice(payload).map_err(MessageError::Decode)
}
