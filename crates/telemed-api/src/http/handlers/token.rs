//! Chat token issuance handler.
//!
//! POST /api/v1/chat-tokens - Issue a short-lived WebSocket ticket for a
//! user. Called by the platform backend after it has authenticated the user
//! with its long-lived credentials; the ticket is then handed to the browser
//! for the WebSocket handshake.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use chrono::Duration;
use serde::Deserialize;
use telemed_core::identity::{TokenRepository, UserRepository};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for token issuance.
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub user_id: Uuid,
}

/// POST /api/v1/chat-tokens - Issue a chat token.
pub async fn issue_chat_token(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<IssueTokenRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    // The token must resolve to a live identity at handshake time; refuse
    // to mint tickets for unknown users.
    let user = state
        .user_repo
        .get_user(&body.user_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::Validation(format!("Unknown user: {}", body.user_id)))?;

    let ttl = Duration::seconds(state.config.token_ttl_secs as i64);
    let token = state
        .token_repo
        .issue(&user.id, ttl)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let elapsed = start.elapsed().as_millis() as u64;

    let token_json =
        serde_json::to_value(&token).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(token_json, request_id, elapsed);

    Ok(Json(resp))
}
