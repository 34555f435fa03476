//! Shared domain types for the telemed consultation backend.
//!
//! This crate contains the domain types used across the platform:
//! consultations, messages, users, chat tokens, the WebSocket wire protocol,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod consultation;
pub mod error;
pub mod message;
pub mod protocol;
pub mod token;
pub mod user;
