//! API error types and response handling.
//!
//! Handlers return [`ApiResult`]; core errors convert into [`ApiError`]
//! using the status code and error code the core assigns them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geogate_core::GeogateError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 403 Forbidden - The server or platform refused the device.
    Forbidden {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Operation cannot be completed in the current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected agent-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 502 Bad Gateway - The door server failed or misbehaved.
    BadGateway {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 503 Service Unavailable - No location fix is available.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// Shorthand for a 400 with the given code.
    pub fn bad_request(error_code: &str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "REQUEST_FAILED",
    "message": "Request to esp32/door/validate failed: connection refused",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "REQUEST_FAILED")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Request to esp32/door/validate failed: connection refused")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            Self::BadRequest { error_code, message } => {
                (StatusCode::BAD_REQUEST, error_code, message, None)
            }
            Self::Forbidden { error_code, message } => {
                (StatusCode::FORBIDDEN, error_code, message, None)
            }
            Self::Conflict { error_code, message } => {
                (StatusCode::CONFLICT, error_code, message, None)
            }
            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_code,
                    message,
                    details.map(serde_json::Value::String),
                )
            }
            Self::BadGateway { error_code, message } => {
                tracing::warn!(error_code = %error_code, message = %message, "Door server error");
                (StatusCode::BAD_GATEWAY, error_code, message, None)
            }
            Self::ServiceUnavailable { error_code, message } => {
                (StatusCode::SERVICE_UNAVAILABLE, error_code, message, None)
            }
        };

        let body = ErrorResponse {
            error: error_code,
            message,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Forbidden { message, .. } => write!(f, "Forbidden: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::BadGateway { message, .. } => write!(f, "Bad Gateway: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from geogate_core errors.
impl From<GeogateError> for ApiError {
    fn from(err: GeogateError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match err.http_status_code() {
            403 => Self::Forbidden { error_code, message },
            409 => Self::Conflict { error_code, message },
            400 | 404 | 422 => Self::BadRequest { error_code, message },
            502 => Self::BadGateway { error_code, message },
            503 => Self::ServiceUnavailable { error_code, message },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<geogate_core::SettingsError> for ApiError {
    fn from(err: geogate_core::SettingsError) -> Self {
        Self::from(GeogateError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::bad_request("invalid_coordinate", "latitude out of range");
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err = ApiError::from(GeogateError::NotAuthorized("Revoked".into()));
        assert!(matches!(err, ApiError::Forbidden { .. }));

        let err = ApiError::from(GeogateError::DeviceNotIdentified);
        assert!(matches!(err, ApiError::Conflict { .. }));

        let err = ApiError::from(GeogateError::RequestFailed {
            endpoint: "esp32/door/validate".into(),
            message: "timeout".into(),
        });
        match err {
            ApiError::BadGateway { error_code, .. } => assert_eq!(error_code, "REQUEST_FAILED"),
            other => panic!("unexpected mapping: {other:?}"),
        }

        let err = ApiError::from(GeogateError::PersistenceError("disk full".into()));
        assert!(matches!(err, ApiError::InternalError { .. }));
    }

    #[test]
    fn test_error_response_status() {
        let response = ApiError::from(GeogateError::LocationUnavailable("no fix".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
