//! Error types for the API service.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crucible_sandbox::error::SandboxError;
use crucible_state::error::StateError;

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Validation failed; nothing was executed and no resource touched.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No sandbox became available within the request's budget.
    #[error("service busy: no sandbox available")]
    ServiceBusy,

    /// The execution exceeded its wall-clock limit.
    #[error("execution timed out")]
    Timeout,

    /// A sandbox failed underneath the request.
    #[error("sandbox failure: {0}")]
    SandboxFailure(String),

    /// The requested object does not exist.
    #[error("not found")]
    NotFound,

    /// Anything unclassified; logged with the request id.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::PoolExhausted | SandboxError::ShuttingDown => Self::ServiceBusy,
            SandboxError::Unhealthy(msg) => Self::SandboxFailure(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceBusy => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::SandboxFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_busy() {
        assert!(matches!(
            ApiError::from(SandboxError::PoolExhausted),
            ApiError::ServiceBusy
        ));
        assert!(matches!(
            ApiError::from(SandboxError::ShuttingDown),
            ApiError::ServiceBusy
        ));
    }

    #[test]
    fn unhealthy_maps_to_sandbox_failure() {
        let err = ApiError::from(SandboxError::Unhealthy("probe".to_string()));
        assert!(matches!(err, ApiError::SandboxFailure(_)));
    }
}
