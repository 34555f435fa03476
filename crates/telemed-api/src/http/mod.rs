//! HTTP/REST and WebSocket API layer for telemed.
//!
//! Axum-based REST API at `/api/v1/` with API key authentication, an
//! envelope response format, and CORS support, plus the consultation chat
//! WebSocket endpoint at `/ws/consultations/{id}`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
