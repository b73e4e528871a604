use thiserror::Error;

/// Bus transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Subjects must be non-empty dot-separated tokens without whitespace.
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),

    /// The bus connection is gone.
    #[error("bus disconnected: {0}")]
    Disconnected(String),

    /// The server refused or failed an operation.
    #[error("bus transport error: {0}")]
    Transport(String),
}
