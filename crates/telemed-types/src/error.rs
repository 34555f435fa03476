use thiserror::Error;

use crate::consultation::ConsultationStatus;

/// Errors raised while processing chat commands against the message store.
///
/// Structural failures (`NotFound`, `Forbidden`, `InvalidState`,
/// `LimitExceeded`) are terminal for the command that triggered them.
/// `TransientConflict` is the one retryable variant: it signals a
/// concurrent-write race on the consultation counters and is retried a
/// bounded number of times before it becomes user-visible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("consultation or message not found")]
    NotFound,

    #[error("sender is not a participant of this consultation")]
    Forbidden,

    #[error("consultation is {0}, messaging requires an active consultation")]
    InvalidState(ConsultationStatus),

    #[error("message limit of {limit} reached, consultation must be extended")]
    LimitExceeded { limit: u32 },

    #[error("concurrent write conflict on consultation counters")]
    TransientConflict,

    #[error("malformed or unknown command: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Machine-readable code carried on `error` events so clients can
    /// distinguish limit-exceeded from forbidden from wrong-state from
    /// retry-exhausted without parsing prose.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotFound => "not_found",
            ChatError::Forbidden => "forbidden",
            ChatError::InvalidState(_) => "invalid_state",
            ChatError::LimitExceeded { .. } => "limit_exceeded",
            ChatError::TransientConflict => "transient_conflict",
            ChatError::Protocol(_) => "protocol_error",
            ChatError::Storage(_) => "internal",
        }
    }

    /// Whether a bounded retry is worthwhile for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::TransientConflict)
    }
}

/// Failures during the WebSocket handshake, before the connection is
/// registered. Authentication and authorization refusals carry distinct
/// close codes so clients can tell a bad token from a policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("access denied: {0}")]
    AuthorizationDenied(String),
}

/// WebSocket close code for authentication failures (application range).
pub const CLOSE_AUTH_FAILURE: u16 = 4001;
/// WebSocket close code for policy violations (RFC 6455 reserved value).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

impl HandshakeError {
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::AuthenticationFailed(_) => CLOSE_AUTH_FAILURE,
            HandshakeError::AuthorizationDenied(_) => CLOSE_POLICY_VIOLATION,
        }
    }
}

/// Errors from repository operations (used by the identity and token trait
/// definitions in telemed-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_codes_distinct() {
        let errors = [
            ChatError::NotFound,
            ChatError::Forbidden,
            ChatError::InvalidState(ConsultationStatus::Completed),
            ChatError::LimitExceeded { limit: 30 },
            ChatError::TransientConflict,
            ChatError::Protocol("bad frame".to_string()),
            ChatError::Storage("disk full".to_string()),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_only_conflict_is_transient() {
        assert!(ChatError::TransientConflict.is_transient());
        assert!(!ChatError::NotFound.is_transient());
        assert!(!ChatError::LimitExceeded { limit: 30 }.is_transient());
        assert!(!ChatError::Forbidden.is_transient());
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = ChatError::LimitExceeded { limit: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_handshake_close_codes() {
        let auth = HandshakeError::AuthenticationFailed("expired token".to_string());
        let policy = HandshakeError::AuthorizationDenied("not a participant".to_string());
        assert_eq!(auth.close_code(), 4001);
        assert_eq!(policy.close_code(), 1008);
        assert_ne!(auth.close_code(), policy.close_code());
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
