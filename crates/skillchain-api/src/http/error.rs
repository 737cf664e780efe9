//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use skillchain_types::error::EngineError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors reported by the engine.
    Engine(EngineError),
    /// Malformed request.
    Validation(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    /// Status code and machine-readable error code.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Engine(e) => match e {
                EngineError::ChainNotFound(_) => (StatusCode::NOT_FOUND, "CHAIN_NOT_FOUND"),
                EngineError::ExecutionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND")
                }
                EngineError::ChainNotPublished(_) => (StatusCode::CONFLICT, "CHAIN_NOT_PUBLISHED"),
                EngineError::ChainEmpty(_) | EngineError::Definition(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_DEFINITION")
                }
                EngineError::ConcurrentModification(_) => {
                    (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
                }
                EngineError::NoPendingAttempt(_) => (StatusCode::CONFLICT, "NO_PENDING_ATTEMPT"),
                EngineError::AttemptMismatch { .. } => (StatusCode::CONFLICT, "ATTEMPT_MISMATCH"),
                EngineError::NotPendingIntervention { .. } => {
                    (StatusCode::CONFLICT, "NOT_PENDING_INTERVENTION")
                }
                EngineError::InterventionRequired(_) => {
                    (StatusCode::CONFLICT, "INTERVENTION_REQUIRED")
                }
                EngineError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
                EngineError::UnknownLink(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_LINK"),
                EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Engine(e) => e.to_string(),
            AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        } else {
            tracing::debug!(code, error = %self.message(), "request rejected");
        }

        let body = ApiResponse::error(code, &self.message(), Uuid::now_v7().to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillchain_types::error::DefinitionError;
    use skillchain_types::execution::{ExecutionId, ExecutionStatus};

    #[test]
    fn engine_errors_map_to_status_codes() {
        let id = ExecutionId::new();
        let cases = [
            (
                AppError::from(EngineError::ConcurrentModification(id)),
                StatusCode::CONFLICT,
                "CONCURRENT_MODIFICATION",
            ),
            (
                AppError::from(EngineError::NotPendingIntervention {
                    status: ExecutionStatus::Running,
                    requires_human_intervention: false,
                }),
                StatusCode::CONFLICT,
                "NOT_PENDING_INTERVENTION",
            ),
            (
                AppError::from(EngineError::ExecutionNotFound(id)),
                StatusCode::NOT_FOUND,
                "EXECUTION_NOT_FOUND",
            ),
            (
                AppError::from(EngineError::Definition(DefinitionError::NoLinks)),
                StatusCode::BAD_REQUEST,
                "INVALID_DEFINITION",
            ),
            (
                AppError::from(EngineError::Storage("disk full".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.classify(), (status, code));
        }
    }

    #[test]
    fn response_uses_classified_status() {
        let resp = AppError::Validation("bad body".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
