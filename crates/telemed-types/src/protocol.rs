//! WebSocket wire protocol: inbound commands and outbound events.
//!
//! Both directions are JSON text frames with a `type` discriminator.
//! Inbound frames decode into [`ClientCommand`]; a frame whose `type` is
//! unknown (or whose fields are malformed) fails to decode, and the session
//! handler answers with a typed `error` event rather than ignoring it.
//!
//! Outbound events carry the identifiers (consultation id, message id,
//! user id) a client needs to reconcile against its local state without a
//! follow-up fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::consultation::{Consultation, ConsultationStatus};
use crate::message::Message;
use crate::user::Participants;

/// Command sent by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Send a chat message. `temp_id` is an optional client-side placeholder
    /// id echoed back on the acknowledgment so the client can reconcile its
    /// optimistic UI entry.
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    /// Mark one message from the peer as read.
    ReadReceipt { message_id: Uuid },
    /// Transition the consultation status (doctor or admin only).
    StatusUpdate { status: ConsultationStatus },
    /// Mark every unread message from the peer as read.
    MarkRead,
    /// Request the full message history plus consultation and participants.
    GetMessagesBulk,
    /// Keep-alive probe; answered with `pong`.
    Ping,
}

/// Event sent by the server, either as a direct reply or as a broadcast to
/// every connection registered to the consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A persisted message. On the sender's acknowledgment copy, `temp_id`
    /// echoes the client-supplied placeholder; broadcast copies omit it.
    Message {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    /// A single message was marked read by the peer.
    ReadReceipt {
        consultation_id: Uuid,
        message_id: Uuid,
        reader_id: Uuid,
    },
    /// The consultation's lifecycle status changed.
    StatusUpdate {
        consultation_id: Uuid,
        status: ConsultationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
    },
    /// Full history reply, sent only to the requesting connection.
    MessagesBulk {
        messages: Vec<Message>,
        consultation: Consultation,
        participants: Participants,
    },
    /// Every unread message from the peer was marked read by `reader_id`.
    MessagesRead {
        consultation_id: Uuid,
        reader_id: Uuid,
    },
    /// Typed failure reply, sent only to the connection that issued the
    /// failing command.
    Error { code: String, message: String },
    /// Reply to a client `ping`.
    Pong,
    /// Server-initiated liveness probe for idle connections.
    Ping,
}

impl ServerEvent {
    /// Build an `error` event from a chat error.
    pub fn error(err: &crate::error::ChatError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    #[test]
    fn test_decode_message_command() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"message","content":"hi","temp_id":"tmp-1"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Message {
                content: "hi".to_string(),
                temp_id: Some("tmp-1".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_message_command_without_temp_id() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"message","content":"hi"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Message { temp_id: None, .. }));
    }

    #[test]
    fn test_decode_ping() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Ping);
    }

    #[test]
    fn test_decode_read_receipt() {
        let id = Uuid::now_v7();
        let raw = format!(r#"{{"type":"read_receipt","message_id":"{id}"}}"#);
        let cmd: ClientCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, ClientCommand::ReadReceipt { message_id: id });
    }

    #[test]
    fn test_decode_status_update() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"status_update","status":"completed"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::StatusUpdate {
                status: ConsultationStatus::Completed,
            }
        );
    }

    #[test]
    fn test_unknown_command_type_fails_to_decode() {
        let result = serde_json::from_str::<ClientCommand>(r#"{"type":"typing_indicator"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_pong_encoding() {
        let json = serde_json::to_string(&ServerEvent::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_error_event_from_chat_error() {
        let event = ServerEvent::error(&ChatError::LimitExceeded { limit: 30 });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":"limit_exceeded""#));
    }

    #[test]
    fn test_broadcast_message_event_omits_temp_id() {
        let message = Message {
            id: Uuid::now_v7(),
            consultation_id: Uuid::now_v7(),
            sender_id: Uuid::now_v7(),
            content: "hello".to_string(),
            sent_at: Utc::now(),
            is_read: false,
        };
        let event = ServerEvent::Message {
            message,
            temp_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("temp_id"));
    }

    #[test]
    fn test_event_roundtrip() {
        let event = ServerEvent::MessagesRead {
            consultation_id: Uuid::now_v7(),
            reader_id: Uuid::now_v7(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
