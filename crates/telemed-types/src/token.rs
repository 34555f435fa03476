//! Short-lived WebSocket connection tickets.
//!
//! A chat token is a single-purpose credential: it authorizes one WebSocket
//! handshake and nothing else. It is issued separately from the long-lived
//! API access token and expires on a minutes scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat token as returned at issue time.
///
/// The `token` field carries the plaintext secret; only its digest is stored
/// at rest, so this value is shown exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl ChatToken {
    /// Whether the token has passed its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
