//! Gateway error taxonomy and its HTTP rendering.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::actions::ActionError;
use crate::github_client::GitHubError;

/// Stable error codes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationFailed,
    RateLimited,
    ConfigError,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ConfigError | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Code for a hosting-service status.
    #[must_use]
    pub const fn from_remote_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            422 => Self::ValidationFailed,
            429 => Self::RateLimited,
            _ => Self::Internal,
        }
    }
}

/// Request failures, each mapped to one [`ErrorCode`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation { message: String, details: Value },

    #[error("Too many requests")]
    RateLimited {
        reset_at: DateTime<Utc>,
        retry_after_secs: i64,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Remote(#[from] GitHubError),

    #[error("{0}")]
    Internal(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Configuration(_) => ErrorCode::ConfigError,
            Self::Remote(e) => e
                .status()
                .map_or(ErrorCode::Internal, ErrorCode::from_remote_status),
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status. Hosting-service failures keep the status they came with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Remote(e) => e
                .status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            other => other.code().status(),
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. } => Some(details.clone()),
            Self::RateLimited { reset_at, .. } => {
                Some(json!({ "resetAt": reset_at.timestamp_millis() }))
            }
            Self::Remote(e) => e.details().cloned(),
            _ => None,
        }
    }
}

impl From<ActionError> for GatewayError {
    fn from(err: ActionError) -> Self {
        Self::Validation {
            details: err.details(),
            message: err.message,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = ?self.code(), status = status.as_u16(), "Request failed: {self}");
        } else {
            warn!(code = ?self.code(), status = status.as_u16(), "Request rejected: {self}");
        }

        let retry_after = match &self {
            Self::RateLimited {
                retry_after_secs, ..
            } => HeaderValue::from_str(&retry_after_secs.to_string()).ok(),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorPayload {
                code: self.code(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
