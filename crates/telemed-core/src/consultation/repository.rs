//! ConsultationRepository trait definition.
//!
//! The message store of the platform: consultations, their counters, and the
//! messages inside them. Implementations live in telemed-infra
//! (e.g., `SqliteConsultationRepository`). Uses native async fn in traits
//! (RPITIT, Rust 2024 edition).

use telemed_types::consultation::{Consultation, ConsultationStatus};
use telemed_types::error::ChatError;
use telemed_types::message::Message;
use uuid::Uuid;

/// Which messages a read action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// A single message by id.
    Single(Uuid),
    /// Every unread message sent by the other participant.
    All,
}

/// Repository trait for consultation and message persistence.
///
/// The `append_message` implementation must run its read-validate-insert-
/// increment sequence as one serialized unit per consultation and surface a
/// concurrent counter race as [`ChatError::TransientConflict`]; the caller
/// owns the retry policy.
pub trait ConsultationRepository: Send + Sync {
    /// Create a consultation (collaborator surface; the messaging core only
    /// reads status and limits).
    fn create_consultation(
        &self,
        consultation: &Consultation,
    ) -> impl std::future::Future<Output = Result<Consultation, ChatError>> + Send;

    /// Get a consultation by id.
    fn get_consultation(
        &self,
        consultation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Consultation>, ChatError>> + Send;

    /// Transition the consultation's lifecycle status.
    ///
    /// Stamps `started_at` when entering `Active` and `completed_at` when
    /// entering `Completed`. Returns the updated row.
    fn set_status(
        &self,
        consultation_id: &Uuid,
        status: ConsultationStatus,
    ) -> impl std::future::Future<Output = Result<Consultation, ChatError>> + Send;

    /// Persist one message and increment the consultation's message counter
    /// in the same transaction.
    ///
    /// Failure ladder: [`ChatError::NotFound`] if the consultation is absent,
    /// [`ChatError::Forbidden`] if the sender is not a participant,
    /// [`ChatError::InvalidState`] unless the status is `Active`,
    /// [`ChatError::LimitExceeded`] once `message_count` reaches
    /// `message_limit`, and [`ChatError::TransientConflict`] when a
    /// concurrent writer won the counter race. Exactly one attempt; no
    /// internal retries.
    fn append_message(
        &self,
        consultation_id: &Uuid,
        sender_id: &Uuid,
        content: &str,
    ) -> impl std::future::Future<Output = Result<Message, ChatError>> + Send;

    /// Flip `is_read` on messages sent by the other participant.
    ///
    /// Idempotent: already-read messages are left untouched. Returns the
    /// number of messages newly flipped. A `Single` target that does not
    /// exist (or belongs to the reader) yields [`ChatError::NotFound`].
    fn mark_read(
        &self,
        consultation_id: &Uuid,
        reader_id: &Uuid,
        target: ReadTarget,
    ) -> impl std::future::Future<Output = Result<u64, ChatError>> + Send;

    /// All messages of a consultation, ordered by `sent_at` ascending.
    /// A pure, restartable read.
    fn list_messages(
        &self,
        consultation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, ChatError>> + Send;

    /// Raise the consultation's message limit by `delta`.
    ///
    /// Used by the "extend consultation" collaborator; shares the same
    /// serialized-write discipline as `append_message`.
    fn bump_limit(
        &self,
        consultation_id: &Uuid,
        delta: u32,
    ) -> impl std::future::Future<Output = Result<Consultation, ChatError>> + Send;

    /// Count all consultations (status surface).
    fn count_consultations(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, ChatError>> + Send;

    /// Count all messages across consultations (status surface).
    fn count_messages(&self)
    -> impl std::future::Future<Output = Result<u64, ChatError>> + Send;
}
