//! Errors rendered as `{status, msg: {code, description}}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use brokerd_messages::{ErrorCode, ErrorResponse};
use tracing::warn;

use crate::error::BrokerError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(detail: impl AsRef<str>) -> Self {
        Self::from_code(ErrorCode::MalformattedRequest, Some(detail.as_ref()))
    }

    fn from_code(code: ErrorCode, arg: Option<&str>) -> Self {
        let body = code.response(arg);
        Self {
            status: StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        if matches!(err, BrokerError::Internal(_)) {
            warn!(error = %err, "Operation failed");
        }
        let body = err.to_response();
        Self {
            status: StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
