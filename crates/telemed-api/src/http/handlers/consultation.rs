//! Consultation REST handlers (collaborator surface).
//!
//! Endpoints:
//! - GET  /api/v1/consultations/{id}          - Get a consultation
//! - GET  /api/v1/consultations/{id}/messages - Message history
//! - POST /api/v1/consultations/{id}/extend   - Raise the message limit

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use telemed_core::consultation::repository::ConsultationRepository;
use telemed_types::error::ChatError;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

/// GET /api/v1/consultations/{id} - Get a consultation by ID.
pub async fn get_consultation(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(consultation_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let cid = parse_uuid(&consultation_id)?;

    let consultation = state
        .chat_service
        .repo()
        .get_consultation(&cid)
        .await?
        .ok_or(ChatError::NotFound)?;

    let elapsed = start.elapsed().as_millis() as u64;

    let consultation_json =
        serde_json::to_value(&consultation).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(consultation_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/consultations/{cid}"))
        .with_link("messages", &format!("/api/v1/consultations/{cid}/messages"));

    Ok(Json(resp))
}

/// GET /api/v1/consultations/{id}/messages - Full message history.
pub async fn get_messages(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(consultation_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let cid = parse_uuid(&consultation_id)?;

    // Existence check so an unknown id is 404, not an empty list.
    state
        .chat_service
        .repo()
        .get_consultation(&cid)
        .await?
        .ok_or(ChatError::NotFound)?;

    let messages = state.chat_service.repo().list_messages(&cid).await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let messages_json: Vec<serde_json::Value> = messages
        .iter()
        .filter_map(|m| serde_json::to_value(m).ok())
        .collect();

    let resp = ApiResponse::success(messages_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/consultations/{cid}/messages"))
        .with_link("consultation", &format!("/api/v1/consultations/{cid}"));

    Ok(Json(resp))
}

/// Messages added per extension, matching the default consultation package.
const EXTEND_DELTA: u32 = 30;

/// POST /api/v1/consultations/{id}/extend - Raise the message limit.
pub async fn extend_consultation(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(consultation_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let cid = parse_uuid(&consultation_id)?;

    let updated = state.chat_service.extend_limit(&cid, EXTEND_DELTA).await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let consultation_json =
        serde_json::to_value(&updated).map_err(|e| AppError::Internal(e.to_string()))?;
    let resp = ApiResponse::success(consultation_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/consultations/{cid}"));

    Ok(Json(resp))
}
