//! Axum router configuration with middleware.
//!
//! REST routes are under `/api/v1/` behind API key auth; the chat WebSocket
//! lives at `/ws/consultations/{id}` and authenticates with its own
//! short-lived token. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Consultation collaborator surface
        .route(
            "/consultations/{id}",
            get(handlers::consultation::get_consultation),
        )
        .route(
            "/consultations/{id}/messages",
            get(handlers::consultation::get_messages),
        )
        .route(
            "/consultations/{id}/extend",
            post(handlers::consultation::extend_consultation),
        )
        // WebSocket ticket issuance
        .route("/chat-tokens", post(handlers::token::issue_chat_token));

    Router::new()
        .nest("/api/v1", api_routes)
        // Consultation chat
        .route("/ws/consultations/{id}", get(handlers::ws::ws_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
