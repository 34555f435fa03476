//! Chat service orchestrating message persistence and event fan-out.
//!
//! ChatService implements the command semantics of the consultation chat
//! independent of the transport: persist first, then broadcast, one command
//! fully processed before the caller reads the next. Transient persistence
//! conflicts are retried here with bounded attempts and randomized backoff;
//! structural failures are returned to the caller untouched.

use std::time::Duration;

use rand::Rng;
use telemed_types::consultation::{Consultation, ConsultationStatus};
use telemed_types::error::ChatError;
use telemed_types::message::Message;
use telemed_types::protocol::ServerEvent;
use telemed_types::user::{ParticipantSummary, Participants, User, UserRole};
use tracing::{info, warn};
use uuid::Uuid;

use crate::consultation::repository::{ConsultationRepository, ReadTarget};
use crate::identity::UserRepository;
use crate::realtime::broadcast::Broadcaster;

/// Retry policy for transient append conflicts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based): the base scaled by
    /// the attempt number plus a random jitter of up to half the base, so
    /// concurrent writers racing on the same consultation desynchronize.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base * attempt;
        let jitter_ceiling = (self.backoff_base / 2).as_millis() as u64;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ceiling)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Orchestrates chat commands against the consultation store and the
/// broadcast engine.
///
/// Generic over `ConsultationRepository` and `UserRepository` so the core
/// never depends on telemed-infra.
pub struct ChatService<C: ConsultationRepository, U: UserRepository> {
    repo: C,
    users: U,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
}

impl<C: ConsultationRepository, U: UserRepository> ChatService<C, U> {
    pub fn new(repo: C, users: U, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            repo,
            users,
            broadcaster,
            retry,
        }
    }

    /// Access the consultation repository.
    pub fn repo(&self) -> &C {
        &self.repo
    }

    /// Access the broadcast engine.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Resolve a consultation and verify the user may act on it.
    ///
    /// The authorization gate shared by the WebSocket handshake and the REST
    /// collaborator surface.
    pub async fn authorize_participant(
        &self,
        consultation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Consultation, ChatError> {
        let consultation = self
            .repo
            .get_consultation(consultation_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !consultation.is_participant(user_id) {
            return Err(ChatError::Forbidden);
        }
        Ok(consultation)
    }

    /// Persist a message and broadcast it to the consultation.
    ///
    /// Only [`ChatError::TransientConflict`] is retried, up to the policy's
    /// attempt budget; structural failures are terminal on the first try.
    /// On success the persisted message has already been broadcast (without
    /// a `temp_id`); the caller owns the sender-only acknowledgment.
    pub async fn send_message(
        &self,
        consultation_id: &Uuid,
        sender_id: &Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let mut attempt = 1u32;
        let message = loop {
            match self
                .repo
                .append_message(consultation_id, sender_id, content)
                .await
            {
                Ok(message) => break message,
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        consultation_id = %consultation_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "append conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(
                            consultation_id = %consultation_id,
                            attempts = attempt,
                            "append retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        };

        self.broadcaster
            .broadcast(
                consultation_id,
                &ServerEvent::Message {
                    message: message.clone(),
                    temp_id: None,
                },
            )
            .await;

        Ok(message)
    }

    /// Mark one message from the peer as read and propagate the receipt.
    ///
    /// Idempotent: a message that is already read flips nothing and triggers
    /// no broadcast. Returns whether the flag was newly flipped.
    pub async fn read_receipt(
        &self,
        consultation_id: &Uuid,
        reader_id: &Uuid,
        message_id: &Uuid,
    ) -> Result<bool, ChatError> {
        let flipped = self
            .repo
            .mark_read(consultation_id, reader_id, ReadTarget::Single(*message_id))
            .await?;
        if flipped > 0 {
            self.broadcaster
                .broadcast(
                    consultation_id,
                    &ServerEvent::ReadReceipt {
                        consultation_id: *consultation_id,
                        message_id: *message_id,
                        reader_id: *reader_id,
                    },
                )
                .await;
        }
        Ok(flipped > 0)
    }

    /// Mark every unread message from the peer as read.
    ///
    /// Broadcasts `messages_read` only when at least one flag flipped.
    /// Returns the number of messages flipped.
    pub async fn mark_all_read(
        &self,
        consultation_id: &Uuid,
        reader_id: &Uuid,
    ) -> Result<u64, ChatError> {
        let flipped = self
            .repo
            .mark_read(consultation_id, reader_id, ReadTarget::All)
            .await?;
        if flipped > 0 {
            self.broadcaster
                .broadcast(
                    consultation_id,
                    &ServerEvent::MessagesRead {
                        consultation_id: *consultation_id,
                        reader_id: *reader_id,
                    },
                )
                .await;
        }
        Ok(flipped)
    }

    /// Transition an active consultation to `completed`.
    ///
    /// Only the consultation's doctor or an admin may complete it; the
    /// status change is broadcast to every registered connection.
    pub async fn complete_consultation(
        &self,
        consultation_id: &Uuid,
        actor: &User,
    ) -> Result<Consultation, ChatError> {
        let consultation = self
            .repo
            .get_consultation(consultation_id)
            .await?
            .ok_or(ChatError::NotFound)?;

        if consultation.doctor_id != actor.id && actor.role != UserRole::Admin {
            return Err(ChatError::Forbidden);
        }
        if consultation.status != ConsultationStatus::Active {
            return Err(ChatError::InvalidState(consultation.status));
        }

        let updated = self
            .repo
            .set_status(consultation_id, ConsultationStatus::Completed)
            .await?;

        info!(consultation_id = %consultation_id, actor = %actor.id, "consultation completed");

        self.broadcaster
            .broadcast(
                consultation_id,
                &ServerEvent::StatusUpdate {
                    consultation_id: *consultation_id,
                    status: updated.status,
                    completed_at: updated.completed_at,
                },
            )
            .await;

        Ok(updated)
    }

    /// Full message history plus consultation and participant summaries.
    ///
    /// A pure read; the caller sends the reply to the requesting connection
    /// and then calls [`Self::mark_all_read`] so the bulk reply reaches the
    /// requester before the `messages_read` broadcast.
    pub async fn bulk_history(
        &self,
        consultation_id: &Uuid,
        requester_id: &Uuid,
    ) -> Result<ServerEvent, ChatError> {
        let consultation = self
            .authorize_participant(consultation_id, requester_id)
            .await?;
        let messages = self.repo.list_messages(consultation_id).await?;
        let participants = self.lookup_participants(&consultation).await?;

        Ok(ServerEvent::MessagesBulk {
            messages,
            consultation,
            participants,
        })
    }

    /// Raise the message limit (the "extend consultation" collaborator).
    pub async fn extend_limit(
        &self,
        consultation_id: &Uuid,
        delta: u32,
    ) -> Result<Consultation, ChatError> {
        let updated = self.repo.bump_limit(consultation_id, delta).await?;
        info!(
            consultation_id = %consultation_id,
            message_limit = updated.message_limit,
            "message limit extended"
        );
        Ok(updated)
    }

    async fn lookup_participants(
        &self,
        consultation: &Consultation,
    ) -> Result<Participants, ChatError> {
        let patient = self
            .users
            .get_user(&consultation.patient_id)
            .await
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        let doctor = self
            .users
            .get_user(&consultation.doctor_id)
            .await
            .map_err(|e| ChatError::Storage(e.to_string()))?;

        // A missing profile row degrades to a role placeholder rather than
        // failing the whole history reply.
        Ok(Participants {
            patient: patient.as_ref().map(ParticipantSummary::from).unwrap_or(
                ParticipantSummary {
                    id: consultation.patient_id,
                    name: "Patient".to_string(),
                    avatar: None,
                },
            ),
            doctor: doctor.as_ref().map(ParticipantSummary::from).unwrap_or(
                ParticipantSummary {
                    id: consultation.doctor_id,
                    name: "Doctor".to_string(),
                    avatar: None,
                },
            ),
        })
    }
}
