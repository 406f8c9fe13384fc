use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use healthpost_core::apply::{ApplyError, BatchFailure};
use healthpost_core::protocol::{BatchErrorBody, ErrorKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// A single operation was rejected
    #[error(transparent)]
    Apply(#[from] ApplyError),
    /// A batch stopped at one of its items
    #[error("{}", .0.error)]
    Batch(BatchFailure),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    kind: ErrorKind,
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}

impl From<BatchFailure> for AppError {
    fn from(failure: BatchFailure) -> Self {
        Self::Batch(failure)
    }
}

pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "message": message })),
            )
                .into_response(),
            Self::Apply(error) => {
                if let ApplyError::Storage(cause) = &error {
                    tracing::error!("Storage failure: {cause}");
                }
                let kind = error.kind();
                let body = ErrorBody {
                    message: error.to_string(),
                    kind,
                };
                (status_for(kind), Json(body)).into_response()
            }
            Self::Batch(failure) => {
                let body: BatchErrorBody = failure.to_body();
                (status_for(body.kind), Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn apply_error_maps_to_response_status() {
        let response = AppError::from(ApplyError::Conflict("no stock".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::unauthorized("Missing Authorization header").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
