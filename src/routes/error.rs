use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::Error;
use crate::services::csrf::CsrfError;
use crate::services::storage::StorageError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let (status, code) = match &e {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::TransitionDenied { .. } => {
                (StatusCode::PRECONDITION_FAILED, "seal_transition_denied")
            }
            Error::PreconditionFailed(_) => (StatusCode::PRECONDITION_FAILED, "precondition_failed"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::TransactionFailed(_) => (StatusCode::SERVICE_UNAVAILABLE, "try_again"),
            Error::Database(_) | Error::Internal(_) => {
                tracing::error!(error = %e, "Request failed");
                return Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                );
            }
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        Self::bad_request(report.to_string())
    }
}

impl From<CsrfError> for ApiError {
    fn from(e: CsrfError) -> Self {
        Self::new(StatusCode::FORBIDDEN, "csrf", e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        tracing::error!(error = %e, "Object storage failed");
        Self::new(StatusCode::BAD_GATEWAY, "storage", "object storage unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rider::SealState;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::TransitionDenied {
                    from: SealState::Expired,
                    to: SealState::Validated,
                },
                StatusCode::PRECONDITION_FAILED,
            ),
            (Error::PreconditionFailed("x".into()), StatusCode::PRECONDITION_FAILED),
            (Error::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (Error::TransactionFailed("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let api = ApiError::from(Error::Internal("connection string secret".into()));
        assert!(!api.message.contains("secret"));
    }
}
