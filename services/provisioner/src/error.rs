//! Provisioner error taxonomy.

use std::time::Duration;

use brokerd_bus::BusError;
use brokerd_messages::{ErrorCode, ErrorResponse, MessageError};
use thiserror::Error;

use crate::handles::HandleSourceError;

/// Every failure an operation can report.
///
/// Selection failures are raised before anything is sent. Node failures
/// carry the node's own error untouched. Anything unexpected collapses into
/// `Internal`.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("malformatted request: {0}")]
    MalformattedRequest(String),

    #[error("unknown plan {0}")]
    UnknownPlan(String),

    #[error("unsupported version {version} for plan {plan}")]
    UnsupportedVersion { plan: String, version: String },

    #[error("no node with free capacity for plan {0}")]
    NoAvailableNode(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("no reply on {subject} within {timeout:?}")]
    GatewayTimeout { subject: String, timeout: Duration },

    #[error("node reported failure: {0}")]
    Node(ErrorResponse),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MalformattedRequest(_) => ErrorCode::MalformattedRequest,
            Self::UnknownPlan(_) => ErrorCode::UnknownPlan,
            Self::UnsupportedVersion { .. } => ErrorCode::UnsupportedVersion,
            Self::NoAvailableNode(_) => ErrorCode::ServiceUnavailable,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::GatewayTimeout { .. } => ErrorCode::GatewayTimeout,
            Self::Node(resp) => {
                ErrorCode::from_code(resp.msg.code).unwrap_or(ErrorCode::InternalError)
            }
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Node(resp) => resp.status,
            other => other.code().status(),
        }
    }

    /// The `{status, msg: {code, description}}` envelope for callers.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::Node(resp) => resp.clone(),
            Self::MalformattedRequest(detail) => self.code().response(Some(detail)),
            Self::UnknownPlan(plan) => self.code().response(Some(plan)),
            Self::UnsupportedVersion { version, .. } => self.code().response(Some(version)),
            Self::NotFound(what) => self.code().response(Some(what)),
            Self::NoAvailableNode(_) | Self::GatewayTimeout { .. } | Self::Internal(_) => {
                self.code().response(None)
            }
        }
    }
}

impl From<BusError> for BrokerError {
    fn from(err: BusError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<MessageError> for BrokerError {
    fn from(err: MessageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<HandleSourceError> for BrokerError {
    fn from(err: HandleSourceError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BrokerError::UnknownPlan("huge".into()), 30003, 400, "Unknown plan huge")]
    #[case(
        BrokerError::UnsupportedVersion { plan: "free".into(), version: "9.9".into() },
        30004,
        400,
        "Unsupported version 9.9"
    )]
    #[case(BrokerError::NoAvailableNode("free".into()), 30600, 503, "Service unavailable")]
    #[case(BrokerError::NotFound("inst-1".into()), 30300, 404, "inst-1 not found")]
    #[case(
        BrokerError::GatewayTimeout { subject: "svc.bind.n1".into(), timeout: Duration::from_secs(5) },
        30700,
        504,
        "Gateway timeout"
    )]
    #[case(BrokerError::internal("boom"), 30500, 500, "Internal Error")]
    fn test_response_envelope(
        #[case] err: BrokerError,
        #[case] code: i32,
        #[case] status: u16,
        #[case] description: &str,
    ) {
        let resp = err.to_response();
        assert_eq!(resp.msg.code, code);
        assert_eq!(resp.status, status);
        assert_eq!(resp.msg.description, description);
    }

    #[test]
    fn test_node_error_passes_through() {
        let node_err = ErrorResponse {
            status: 409,
            msg: brokerd_messages::ErrorPayload {
                code: 31001,
                description: "Disk quota exceeded".to_string(),
            },
        };
        let err = BrokerError::Node(node_err.clone());
        assert_eq!(err.to_response(), node_err);
        assert_eq!(err.status(), 409);
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
