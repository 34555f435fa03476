//! SQLite consultation repository implementation.
//!
//! Implements `ConsultationRepository` from `telemed-core` using sqlx with
//! split read/write pools: raw queries, private Row structs, reads on the
//! reader pool, mutations on the single-connection writer pool.
//!
//! The append path is the serialization point for the per-consultation
//! counters: one writer transaction re-reads the row, validates, inserts the
//! message, and increments `message_count` guarded by the value it read.
//! A guard miss (or SQLITE_BUSY) surfaces as `ChatError::TransientConflict`
//! and the caller retries the whole step as one unit.

use chrono::{DateTime, Utc};
use sqlx::Row;
use telemed_core::consultation::repository::{ConsultationRepository, ReadTarget};
use telemed_types::consultation::{Consultation, ConsultationStatus};
use telemed_types::error::ChatError;
use telemed_types::message::Message;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConsultationRepository`.
pub struct SqliteConsultationRepository {
    pool: DatabasePool,
}

impl SqliteConsultationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConsultationRow {
    id: String,
    patient_id: String,
    doctor_id: String,
    status: String,
    message_limit: i64,
    message_count: i64,
    patient_note: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl ConsultationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            patient_id: row.try_get("patient_id")?,
            doctor_id: row.try_get("doctor_id")?,
            status: row.try_get("status")?,
            message_limit: row.try_get("message_limit")?,
            message_count: row.try_get("message_count")?,
            patient_note: row.try_get("patient_note")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_consultation(self) -> Result<Consultation, ChatError> {
        let id = parse_uuid(&self.id, "consultation id")?;
        let patient_id = parse_uuid(&self.patient_id, "patient_id")?;
        let doctor_id = parse_uuid(&self.doctor_id, "doctor_id")?;
        let status: ConsultationStatus =
            self.status.parse().map_err(ChatError::Storage)?;
        let created_at = parse_datetime(&self.created_at)?;
        let started_at = self.started_at.as_deref().map(parse_datetime).transpose()?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(Consultation {
            id,
            patient_id,
            doctor_id,
            status,
            message_limit: self.message_limit as u32,
            message_count: self.message_count as u32,
            patient_note: self.patient_note,
            created_at,
            started_at,
            completed_at,
        })
    }
}

struct MessageRow {
    id: String,
    consultation_id: String,
    sender_id: String,
    content: String,
    sent_at: String,
    is_read: bool,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            consultation_id: row.try_get("consultation_id")?,
            sender_id: row.try_get("sender_id")?,
            content: row.try_get("content")?,
            sent_at: row.try_get("sent_at")?,
            is_read: row.try_get("is_read")?,
        })
    }

    fn into_message(self) -> Result<Message, ChatError> {
        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            consultation_id: parse_uuid(&self.consultation_id, "consultation_id")?,
            sender_id: parse_uuid(&self.sender_id, "sender_id")?,
            content: self.content,
            sent_at: parse_datetime(&self.sent_at)?,
            is_read: self.is_read,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, ChatError> {
    Uuid::parse_str(s).map_err(|e| ChatError::Storage(format!("invalid {what}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ChatError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChatError::Storage(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Map a sqlx error to the chat taxonomy. SQLITE_BUSY (5) and SQLITE_LOCKED
/// (6) are concurrent-writer races and therefore transient; everything else
/// is a storage fault.
fn map_db_err(e: sqlx::Error) -> ChatError {
    if let Some(db_err) = e.as_database_error() {
        if let Some(code) = db_err.code() {
            if code.as_ref() == "5" || code.as_ref() == "6" {
                return ChatError::TransientConflict;
            }
        }
    }
    ChatError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// ConsultationRepository implementation
// ---------------------------------------------------------------------------

impl ConsultationRepository for SqliteConsultationRepository {
    async fn create_consultation(
        &self,
        consultation: &Consultation,
    ) -> Result<Consultation, ChatError> {
        sqlx::query(
            r#"INSERT INTO consultations (id, patient_id, doctor_id, status, message_limit, message_count, patient_note, created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(consultation.id.to_string())
        .bind(consultation.patient_id.to_string())
        .bind(consultation.doctor_id.to_string())
        .bind(consultation.status.to_string())
        .bind(consultation.message_limit as i64)
        .bind(consultation.message_count as i64)
        .bind(&consultation.patient_note)
        .bind(format_datetime(&consultation.created_at))
        .bind(consultation.started_at.as_ref().map(format_datetime))
        .bind(consultation.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(map_db_err)?;

        Ok(consultation.clone())
    }

    async fn get_consultation(
        &self,
        consultation_id: &Uuid,
    ) -> Result<Option<Consultation>, ChatError> {
        let row = sqlx::query("SELECT * FROM consultations WHERE id = ?")
            .bind(consultation_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_db_err)?;

        match row {
            Some(row) => {
                let consultation_row = ConsultationRow::from_row(&row)
                    .map_err(|e| ChatError::Storage(e.to_string()))?;
                Ok(Some(consultation_row.into_consultation()?))
            }
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        consultation_id: &Uuid,
        status: ConsultationStatus,
    ) -> Result<Consultation, ChatError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_db_err)?;

        let row = sqlx::query("SELECT * FROM consultations WHERE id = ?")
            .bind(consultation_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?
            .ok_or(ChatError::NotFound)?;
        let mut consultation = ConsultationRow::from_row(&row)
            .map_err(|e| ChatError::Storage(e.to_string()))?
            .into_consultation()?;

        consultation.status = status;
        match status {
            ConsultationStatus::Active if consultation.started_at.is_none() => {
                consultation.started_at = Some(Utc::now());
            }
            ConsultationStatus::Completed => {
                consultation.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        sqlx::query(
            "UPDATE consultations SET status = ?, started_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(consultation.status.to_string())
        .bind(consultation.started_at.as_ref().map(format_datetime))
        .bind(consultation.completed_at.as_ref().map(format_datetime))
        .bind(consultation_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(consultation)
    }

    async fn append_message(
        &self,
        consultation_id: &Uuid,
        sender_id: &Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_db_err)?;

        let row = sqlx::query("SELECT * FROM consultations WHERE id = ?")
            .bind(consultation_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_err)?
            .ok_or(ChatError::NotFound)?;
        let consultation = ConsultationRow::from_row(&row)
            .map_err(|e| ChatError::Storage(e.to_string()))?
            .into_consultation()?;

        if !consultation.is_participant(sender_id) {
            return Err(ChatError::Forbidden);
        }
        if consultation.status != ConsultationStatus::Active {
            return Err(ChatError::InvalidState(consultation.status));
        }
        if consultation.message_count >= consultation.message_limit {
            return Err(ChatError::LimitExceeded {
                limit: consultation.message_limit,
            });
        }

        let message = Message {
            id: Uuid::now_v7(),
            consultation_id: *consultation_id,
            sender_id: *sender_id,
            content: content.to_string(),
            sent_at: Utc::now(),
            is_read: false,
        };

        sqlx::query(
            r#"INSERT INTO messages (id, consultation_id, sender_id, content, sent_at, is_read)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.consultation_id.to_string())
        .bind(message.sender_id.to_string())
        .bind(&message.content)
        .bind(format_datetime(&message.sent_at))
        .bind(message.is_read)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        // Optimistic guard: the increment only lands if nobody moved the
        // counter since the read above. A miss aborts the whole step.
        let result = sqlx::query(
            "UPDATE consultations SET message_count = message_count + 1 WHERE id = ? AND message_count = ?",
        )
        .bind(consultation_id.to_string())
        .bind(consultation.message_count as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(map_db_err)?;
            return Err(ChatError::TransientConflict);
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(message)
    }

    async fn mark_read(
        &self,
        consultation_id: &Uuid,
        reader_id: &Uuid,
        target: ReadTarget,
    ) -> Result<u64, ChatError> {
        match target {
            ReadTarget::Single(message_id) => {
                let result = sqlx::query(
                    r#"UPDATE messages SET is_read = 1
                       WHERE id = ? AND consultation_id = ? AND sender_id != ? AND is_read = 0"#,
                )
                .bind(message_id.to_string())
                .bind(consultation_id.to_string())
                .bind(reader_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(map_db_err)?;

                if result.rows_affected() > 0 {
                    return Ok(result.rows_affected());
                }

                // Nothing flipped: distinguish "already read" from "absent
                // or the reader's own message".
                let exists = sqlx::query(
                    "SELECT 1 FROM messages WHERE id = ? AND consultation_id = ? AND sender_id != ?",
                )
                .bind(message_id.to_string())
                .bind(consultation_id.to_string())
                .bind(reader_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(map_db_err)?;

                match exists {
                    Some(_) => Ok(0),
                    None => Err(ChatError::NotFound),
                }
            }
            ReadTarget::All => {
                let exists = sqlx::query("SELECT 1 FROM consultations WHERE id = ?")
                    .bind(consultation_id.to_string())
                    .fetch_optional(&self.pool.reader)
                    .await
                    .map_err(map_db_err)?;
                if exists.is_none() {
                    return Err(ChatError::NotFound);
                }

                let result = sqlx::query(
                    r#"UPDATE messages SET is_read = 1
                       WHERE consultation_id = ? AND sender_id != ? AND is_read = 0"#,
                )
                .bind(consultation_id.to_string())
                .bind(reader_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(map_db_err)?;

                Ok(result.rows_affected())
            }
        }
    }

    async fn list_messages(&self, consultation_id: &Uuid) -> Result<Vec<Message>, ChatError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE consultation_id = ? ORDER BY sent_at ASC, id ASC",
        )
        .bind(consultation_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_db_err)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message_row =
                MessageRow::from_row(row).map_err(|e| ChatError::Storage(e.to_string()))?;
            messages.push(message_row.into_message()?);
        }

        Ok(messages)
    }

    async fn bump_limit(
        &self,
        consultation_id: &Uuid,
        delta: u32,
    ) -> Result<Consultation, ChatError> {
        let result = sqlx::query(
            "UPDATE consultations SET message_limit = message_limit + ? WHERE id = ?",
        )
        .bind(delta as i64)
        .bind(consultation_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound);
        }

        self.get_consultation(consultation_id)
            .await?
            .ok_or(ChatError::NotFound)
    }

    async fn count_consultations(&self) -> Result<u64, ChatError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM consultations")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(map_db_err)?;
        let count: i64 = row.try_get("cnt").map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(count as u64)
    }

    async fn count_messages(&self) -> Result<u64, ChatError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM messages")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(map_db_err)?;
        let count: i64 = row.try_get("cnt").map_err(|e| ChatError::Storage(e.to_string()))?;
        Ok(count as u64)
    }
}
