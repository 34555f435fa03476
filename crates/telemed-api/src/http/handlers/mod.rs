//! HTTP request handlers for the REST API and the chat WebSocket.

pub mod consultation;
pub mod token;
pub mod ws;
