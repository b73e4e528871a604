//! Error codes and the error payload shape surfaced to external callers.
//!
//! Codes are grouped by range: 300xx bad request, 303xx not found,
//! 305xx internal, 306xx unavailable, 307xx gateway, 309xx job errors.

use serde::{Deserialize, Serialize};

/// Structured error body: a numeric code and a human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub description: String,
}

/// Error envelope: `{status, msg: {code, description}}`.
///
/// Nodes send this shape in failed replies; the provisioner passes it through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub msg: ErrorPayload,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (code {}, status {})",
            self.msg.description, self.msg.code, self.status
        )
    }
}

/// Known error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MalformattedRequest,
    UnknownPlan,
    UnsupportedVersion,
    NotFound,
    InternalError,
    ServiceUnavailable,
    GatewayTimeout,
    JobQueueTimeout,
    JobTimeout,
}

impl ErrorCode {
    /// Numeric wire code.
    pub const fn code(self) -> i32 {
        match self {
            Self::MalformattedRequest => 30001,
            Self::UnknownPlan => 30003,
            Self::UnsupportedVersion => 30004,
            Self::NotFound => 30300,
            Self::InternalError => 30500,
            Self::ServiceUnavailable => 30600,
            Self::GatewayTimeout => 30700,
            Self::JobQueueTimeout => 30900,
            Self::JobTimeout => 30901,
        }
    }

    /// HTTP-like status the code is reported with.
    pub const fn status(self) -> u16 {
        match self {
            Self::MalformattedRequest | Self::UnknownPlan | Self::UnsupportedVersion => 400,
            Self::NotFound => 404,
            Self::InternalError | Self::JobQueueTimeout | Self::JobTimeout => 500,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }

    /// Look up a code by its wire number.
    pub fn from_code(code: i32) -> Option<Self> {
        [
            Self::MalformattedRequest,
            Self::UnknownPlan,
            Self::UnsupportedVersion,
            Self::NotFound,
            Self::InternalError,
            Self::ServiceUnavailable,
            Self::GatewayTimeout,
            Self::JobQueueTimeout,
            Self::JobTimeout,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }

    fn template(self) -> &'static str {
        match self {
            Self::MalformattedRequest => "Malformatted request",
            Self::UnknownPlan => "Unknown plan %s",
            Self::UnsupportedVersion => "Unsupported version %s",
            Self::NotFound => "%s not found",
            Self::InternalError => "Internal Error",
            Self::ServiceUnavailable => "Service unavailable",
            Self::GatewayTimeout => "Gateway timeout",
            Self::JobQueueTimeout => "Job timeout after waiting for %s seconds.",
            Self::JobTimeout => "Job is killed since it runs longer than ttl: %s seconds.",
        }
    }

    /// Render the description, substituting `arg` for the `%s` placeholder.
    pub fn description(self, arg: Option<&str>) -> String {
        let template = self.template();
        match arg {
            Some(arg) if template.contains("%s") => template.replacen("%s", arg, 1),
            Some(arg) if !arg.is_empty() => format!("{template}: {arg}"),
            _ => template.replacen(" %s", "", 1).replacen("%s ", "", 1),
        }
    }

    /// Build the full error envelope.
    pub fn response(self, arg: Option<&str>) -> ErrorResponse {
        ErrorResponse {
            status: self.status(),
            msg: ErrorPayload {
                code: self.code(),
                description: self.description(arg),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorCode::UnknownPlan, Some("large"), "Unknown plan large")]
    #[case(ErrorCode::NotFound, Some("inst-1"), "inst-1 not found")]
    #[case(ErrorCode::JobQueueTimeout, Some("10"), "Job timeout after waiting for 10 seconds.")]
    #[case(ErrorCode::InternalError, None, "Internal Error")]
    #[case(ErrorCode::InternalError, Some("disk full"), "Internal Error: disk full")]
    #[case(ErrorCode::UnsupportedVersion, None, "Unsupported version")]
    fn test_description(#[case] code: ErrorCode, #[case] arg: Option<&str>, #[case] want: &str) {
        assert_eq!(code.description(arg), want);
    }

    #[test]
    fn test_response_shape() {
        let resp = ErrorCode::GatewayTimeout.response(None);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": 504,
                "msg": {"code": 30700, "description": "Gateway timeout"}
            })
        );
    }

    #[test]
    fn test_from_code() {
        assert_eq!(ErrorCode::from_code(30901), Some(ErrorCode::JobTimeout));
        assert_eq!(ErrorCode::from_code(1), None);
    }
}
