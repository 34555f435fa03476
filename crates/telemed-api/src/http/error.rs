//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use telemed_types::error::ChatError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Chat/consultation errors.
    Chat(ChatError),
    /// Authentication failure.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Chat(ChatError::NotFound) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Consultation or message not found".to_string(),
            ),
            AppError::Chat(ChatError::Forbidden) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Not a participant of this consultation".to_string(),
            ),
            AppError::Chat(e @ ChatError::InvalidState(_)) => {
                (StatusCode::CONFLICT, "INVALID_STATE", e.to_string())
            }
            AppError::Chat(e @ ChatError::LimitExceeded { .. }) => {
                (StatusCode::CONFLICT, "LIMIT_EXCEEDED", e.to_string())
            }
            AppError::Chat(ChatError::TransientConflict) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "TRANSIENT_CONFLICT",
                "Concurrent write conflict, please retry".to_string(),
            ),
            AppError::Chat(ChatError::Protocol(msg)) => {
                (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR", msg.clone())
            }
            AppError::Chat(e @ ChatError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORAGE_ERROR",
                e.to_string(),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let envelope =
            ApiResponse::error(code, &message, uuid::Uuid::now_v7().to_string(), 0);
        let body = serde_json::to_string(&envelope).unwrap_or_else(|_| {
            json!({"errors": [{"code": code, "message": message}]}).to_string()
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemed_types::consultation::ConsultationStatus;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_chat_error_status_mapping() {
        assert_eq!(
            status_of(AppError::Chat(ChatError::NotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::Chat(ChatError::Forbidden)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(AppError::Chat(ChatError::InvalidState(
                ConsultationStatus::Pending
            ))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Chat(ChatError::LimitExceeded { limit: 30 })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::Chat(ChatError::TransientConflict)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unauthorized_status() {
        assert_eq!(
            status_of(AppError::Unauthorized("no key".to_string())),
            StatusCode::UNAUTHORIZED
        );
    }
}
