//! Axum extractors.

pub mod auth;
