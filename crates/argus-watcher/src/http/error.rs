//! HTTP error envelope: `{ok:false, error:{message, code}}`.

use argus_cdp::CdpError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::WatcherError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "ok": false,
            "error": {
                "message": self.message,
                "code": self.code,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<WatcherError> for ApiError {
    fn from(err: WatcherError) -> Self {
        let code = err.code().to_owned();
        let message = err.to_string();
        let status = match &err {
            WatcherError::Validation(_) => StatusCode::BAD_REQUEST,
            // Validated failures of the op itself, not of the request:
            // the envelope carries the code, the transport says 200.
            WatcherError::MultipleMatches { .. }
            | WatcherError::NotInteractable
            | WatcherError::OriginMismatch { .. } => StatusCode::OK,
            WatcherError::Cdp(CdpError::NotAttached) => StatusCode::CONFLICT,
            WatcherError::Cdp(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WatcherError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code,
            message,
        }
    }
}

impl From<CdpError> for ApiError {
    fn from(err: CdpError) -> Self {
        WatcherError::from(err).into()
    }
}
