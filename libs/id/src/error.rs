use thiserror::Error;
use ulid::Ulid;

/// Why a string is not a valid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,

    /// Well-formed, but minted for another type.
    #[error("expected a '{expected}_' identifier, got prefix '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("identifier has no '_' between prefix and ULID")]
    MissingSeparator,

    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, Self::InvalidPrefix { .. })
    }
}

/// Split `{prefix}_{ulid}` and check the prefix. Used by `define_id!`.
#[doc(hidden)]
pub fn parse_prefixed(raw: &str, expected: &'static str) -> Result<Ulid, IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty);
    }
    let (prefix, ulid) = raw.split_once('_').ok_or(IdError::MissingSeparator)?;
    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_string(),
        });
    }
    Ulid::from_string(ulid).map_err(|e| IdError::InvalidUlid(e.to_string()))
}
