use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use cloak_core::CoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ServerError {
    fn from(rejection: PathRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(err) => match err {
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::AlreadyMasked
                | CoreError::NotMasked
                | CoreError::AlreadyAssigned => StatusCode::CONFLICT,
                CoreError::NotEligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::Unauthorized => StatusCode::FORBIDDEN,
                CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                CoreError::GenerationExhausted { .. } | CoreError::AuditUnavailable => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                CoreError::DecryptionFailure
                | CoreError::VaultCorruption(_)
                | CoreError::Config(_)
                | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::Core(err) => err.kind(),
            ServerError::Unauthenticated(_) => "unauthenticated",
            ServerError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Core(CoreError::Internal(detail)) = &self {
            tracing::error!(detail = %detail, "internal error");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}
