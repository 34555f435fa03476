//! Chat message type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single message within a consultation.
///
/// Messages are ordered by `sent_at` within a consultation and are never
/// deleted by the messaging core; they cascade away only when the owning
/// consultation is deleted by the administrative surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    /// Flipped by the recipient's read actions; starts false.
    pub is_read: bool,
}
