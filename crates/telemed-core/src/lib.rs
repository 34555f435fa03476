//! Business logic for the telemed consultation backend.
//!
//! This crate defines the repository traits implemented by telemed-infra,
//! the in-process connection registry and broadcast engine, and the chat
//! service that ties persistence and fan-out together. It never depends on
//! infrastructure crates; everything here is generic over the traits.

pub mod chat;
pub mod consultation;
pub mod identity;
pub mod realtime;
