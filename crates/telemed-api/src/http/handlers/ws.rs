//! WebSocket session handler for the consultation chat.
//!
//! `/ws/consultations/{id}?token=<chat token>` upgrades to a WebSocket and
//! walks the connection through its lifecycle: authenticate the token,
//! authorize against the consultation, register in the connection registry,
//! then run the event loop. Commands are processed one at a time, fully
//! (persist, broadcast, reply) before the next frame is read.
//!
//! Refusals before registration close with distinct codes: 4001 for
//! authentication failures, 1008 for policy violations (unknown
//! consultation, non-participant). No registry mutation happens on a
//! refused handshake.
//!
//! The one liveness signal is the send path itself: an idle connection is
//! probed with a `ping` event and closed after the grace period; a peer
//! that cannot accept frames is swept by the broadcast engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use telemed_core::identity::{TokenRepository, UserRepository};
use telemed_core::realtime::registry::ConnectionHandle;
use telemed_types::consultation::{Consultation, ConsultationStatus};
use telemed_types::error::{ChatError, HandshakeError};
use telemed_types::protocol::{ClientCommand, ServerEvent};
use telemed_types::user::User;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Close code for unexpected internal faults (RFC 6455 reserved value).
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Query parameters of the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Why a handshake was refused, with its WebSocket close code.
#[derive(Debug)]
struct Refusal {
    code: u16,
    reason: String,
}

impl From<HandshakeError> for Refusal {
    fn from(err: HandshakeError) -> Self {
        Self {
            code: err.close_code(),
            reason: match err {
                HandshakeError::AuthenticationFailed(reason) => reason,
                HandshakeError::AuthorizationDenied(reason) => reason,
            },
        }
    }
}

impl Refusal {
    fn internal() -> Self {
        Self {
            code: CLOSE_INTERNAL_ERROR,
            reason: "Internal error".to_string(),
        }
    }
}

/// Upgrade an HTTP request to the consultation chat WebSocket.
///
/// This is mounted at `/ws/consultations/{id}` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(consultation_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, consultation_id, query.token))
}

/// Full connection lifecycle: handshake, event loop, guaranteed cleanup.
async fn handle_session(
    mut socket: WebSocket,
    state: AppState,
    consultation_id_raw: String,
    token: Option<String>,
) {
    let (user, consultation) =
        match authenticate(&state, &consultation_id_raw, token.as_deref()).await {
            Ok(pair) => pair,
            Err(refusal) => {
                info!(
                    consultation_id = %consultation_id_raw,
                    code = refusal.code,
                    reason = %refusal.reason,
                    "handshake refused"
                );
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: refusal.code,
                        reason: refusal.reason.into(),
                    })))
                    .await;
                return;
            }
        };

    let consultation_id = consultation.id;
    let (tx, outbound_rx) = mpsc::channel(state.config.outbound_capacity);
    let conn = Arc::new(ConnectionHandle::new(user.id, consultation_id, tx));
    state.registry.register(Arc::clone(&conn)).await;

    info!(
        conn_id = %conn.id,
        user_id = %user.id,
        consultation_id = %consultation_id,
        "chat session opened"
    );

    run_event_loop(socket, &state, &user, consultation_id, outbound_rx).await;

    // Unconditional cleanup: every exit path of the loop lands here.
    state.registry.unregister(&conn).await;
    info!(conn_id = %conn.id, user_id = %user.id, "chat session closed");
}

/// Resolve the token to a user and the path to a consultation the user may
/// join. Runs entirely before any registry mutation.
async fn authenticate(
    state: &AppState,
    consultation_id_raw: &str,
    token: Option<&str>,
) -> Result<(User, Consultation), Refusal> {
    let token = token.ok_or_else(|| {
        Refusal::from(HandshakeError::AuthenticationFailed(
            "Authentication required".to_string(),
        ))
    })?;

    let user_id = state
        .token_repo
        .redeem(token)
        .await
        .map_err(|e| {
            warn!(error = %e, "token redemption failed");
            Refusal::internal()
        })?
        .ok_or_else(|| {
            Refusal::from(HandshakeError::AuthenticationFailed(
                "Invalid or expired token".to_string(),
            ))
        })?;

    let user = state
        .user_repo
        .get_user(&user_id)
        .await
        .map_err(|e| {
            warn!(error = %e, "user lookup failed");
            Refusal::internal()
        })?
        .ok_or_else(|| {
            Refusal::from(HandshakeError::AuthenticationFailed(
                "User not found".to_string(),
            ))
        })?;

    // An unparsable id cannot name a consultation: same refusal as unknown.
    let consultation_id: Uuid = consultation_id_raw.parse().map_err(|_| {
        Refusal::from(HandshakeError::AuthorizationDenied(
            "Consultation not found".to_string(),
        ))
    })?;

    let consultation = state
        .chat_service
        .authorize_participant(&consultation_id, &user.id)
        .await
        .map_err(|err| match err {
            ChatError::NotFound => Refusal::from(HandshakeError::AuthorizationDenied(
                "Consultation not found".to_string(),
            )),
            ChatError::Forbidden => Refusal::from(HandshakeError::AuthorizationDenied(
                "Access denied".to_string(),
            )),
            other => {
                warn!(error = %other, "consultation lookup failed");
                Refusal::internal()
            }
        })?;

    Ok((user, consultation))
}

/// The session's event loop: one inbound command at a time, multiplexed with
/// the outbound queue and the idle probe.
async fn run_event_loop(
    socket: WebSocket,
    state: &AppState,
    user: &User,
    consultation_id: Uuid,
    mut outbound_rx: mpsc::Receiver<Arc<String>>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let ping_after = Duration::from_secs(state.config.idle_ping_secs);
    let close_after = ping_after + Duration::from_secs(state.config.idle_grace_secs);
    let mut idle_check =
        tokio::time::interval(Duration::from_secs(state.config.idle_grace_secs.max(1)));
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_inbound = Instant::now();
    let mut probe_sent = false;

    loop {
        tokio::select! {
            // --- Branch 1: Forward queued events (broadcasts) to the client ---
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_sender
                            .send(WsMessage::Text(frame.as_str().into()))
                            .await
                            .is_err()
                        {
                            // Client disconnected
                            break;
                        }
                    }
                    None => break,
                }
            }

            // --- Branch 2: Process one inbound command to completion ---
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_inbound = Instant::now();
                        probe_sent = false;
                        if process_command(&text, &mut ws_sender, state, user, consultation_id)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                        last_inbound = Instant::now();
                        probe_sent = false;
                    }
                    // Binary frames carry nothing in this protocol.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error");
                        break;
                    }
                }
            }

            // --- Branch 3: Idle probe and eviction ---
            _ = idle_check.tick() => {
                let idle_for = last_inbound.elapsed();
                if idle_for >= close_after {
                    info!(
                        user_id = %user.id,
                        consultation_id = %consultation_id,
                        idle_secs = idle_for.as_secs(),
                        "closing idle connection"
                    );
                    break;
                }
                if idle_for >= ping_after && !probe_sent {
                    probe_sent = true;
                    if send_event(&mut ws_sender, &ServerEvent::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Serialize an event and write it to this connection's socket.
async fn send_event(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    ws_sender.send(WsMessage::Text(json.into())).await
}

/// Reply a typed error to this connection only; never broadcast.
async fn reply_error(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    err: &ChatError,
) -> Result<(), axum::Error> {
    send_event(ws_sender, &ServerEvent::error(err)).await
}

/// Decode and dispatch a single command.
///
/// Command failures are reported to this connection and the loop continues;
/// only a dead socket (send failure) errors out of here and ends the loop.
async fn process_command(
    text: &str,
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    state: &AppState,
    user: &User,
    consultation_id: Uuid,
) -> Result<(), axum::Error> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "malformed command frame");
            return reply_error(
                ws_sender,
                &ChatError::Protocol(format!("unrecognized command: {err}")),
            )
            .await;
        }
    };

    match command {
        ClientCommand::Message { content, temp_id } => {
            if content.trim().is_empty() {
                return reply_error(
                    ws_sender,
                    &ChatError::Protocol("empty message content".to_string()),
                )
                .await;
            }
            match state
                .chat_service
                .send_message(&consultation_id, &user.id, &content)
                .await
            {
                Ok(message) => {
                    // Broadcast went to every registered connection; the ack
                    // correlates the sender's optimistic placeholder.
                    send_event(ws_sender, &ServerEvent::Message { message, temp_id }).await?;
                }
                Err(err) => {
                    reply_error(ws_sender, &err).await?;
                }
            }
        }

        ClientCommand::ReadReceipt { message_id } => {
            if let Err(err) = state
                .chat_service
                .read_receipt(&consultation_id, &user.id, &message_id)
                .await
            {
                reply_error(ws_sender, &err).await?;
            }
        }

        ClientCommand::StatusUpdate { status } => {
            if status != ConsultationStatus::Completed {
                return reply_error(
                    ws_sender,
                    &ChatError::Protocol(format!(
                        "only 'completed' may be requested, got '{status}'"
                    )),
                )
                .await;
            }
            if let Err(err) = state
                .chat_service
                .complete_consultation(&consultation_id, user)
                .await
            {
                reply_error(ws_sender, &err).await?;
            }
        }

        ClientCommand::MarkRead => {
            if let Err(err) = state
                .chat_service
                .mark_all_read(&consultation_id, &user.id)
                .await
            {
                reply_error(ws_sender, &err).await?;
            }
        }

        ClientCommand::GetMessagesBulk => {
            match state
                .chat_service
                .bulk_history(&consultation_id, &user.id)
                .await
            {
                Ok(bulk) => {
                    // Reply to the requester first, then flip the unread
                    // flags and broadcast `messages_read` to everyone.
                    send_event(ws_sender, &bulk).await?;
                    if let Err(err) = state
                        .chat_service
                        .mark_all_read(&consultation_id, &user.id)
                        .await
                    {
                        warn!(error = %err, "post-history read sweep failed");
                    }
                }
                Err(err) => {
                    reply_error(ws_sender, &err).await?;
                }
            }
        }

        ClientCommand::Ping => {
            send_event(ws_sender, &ServerEvent::Pong).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as TokenTtl, Utc};
    use telemed_core::consultation::repository::ConsultationRepository;
    use telemed_types::error::{CLOSE_AUTH_FAILURE, CLOSE_POLICY_VIOLATION};
    use telemed_types::user::UserRole;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        AppState::init_at(path).await.unwrap()
    }

    async fn seed_user(state: &AppState, role: UserRole) -> User {
        let user = User {
            id: Uuid::now_v7(),
            role,
            display_name: format!("test {role}"),
            avatar_path: None,
            created_at: Utc::now(),
        };
        state.user_repo.create_user(&user).await.unwrap();
        user
    }

    async fn seed_consultation(state: &AppState, patient: &User, doctor: &User) -> Consultation {
        state
            .chat_service
            .repo()
            .create_consultation(&Consultation {
                id: Uuid::now_v7(),
                patient_id: patient.id,
                doctor_id: doctor.id,
                status: ConsultationStatus::Active,
                message_limit: 30,
                message_count: 0,
                patient_note: None,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_an_auth_refusal() {
        let state = test_state().await;
        let refusal = authenticate(&state, &Uuid::now_v7().to_string(), None)
            .await
            .err()
            .unwrap();
        assert_eq!(refusal.code, CLOSE_AUTH_FAILURE);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refused_before_any_registration() {
        let state = test_state().await;
        let patient = seed_user(&state, UserRole::Patient).await;
        let doctor = seed_user(&state, UserRole::Doctor).await;
        let consultation = seed_consultation(&state, &patient, &doctor).await;

        let token = state
            .token_repo
            .issue(&patient.id, TokenTtl::seconds(-1))
            .await
            .unwrap();

        let refusal = authenticate(&state, &consultation.id.to_string(), Some(&token.token))
            .await
            .err()
            .unwrap();
        assert_eq!(refusal.code, CLOSE_AUTH_FAILURE);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn unknown_consultation_is_a_policy_refusal() {
        let state = test_state().await;
        let patient = seed_user(&state, UserRole::Patient).await;
        let token = state
            .token_repo
            .issue(&patient.id, TokenTtl::minutes(5))
            .await
            .unwrap();

        let refusal = authenticate(&state, &Uuid::now_v7().to_string(), Some(&token.token))
            .await
            .err()
            .unwrap();
        assert_eq!(refusal.code, CLOSE_POLICY_VIOLATION);
    }

    #[tokio::test]
    async fn unparsable_consultation_id_is_a_policy_refusal() {
        let state = test_state().await;
        let patient = seed_user(&state, UserRole::Patient).await;
        let token = state
            .token_repo
            .issue(&patient.id, TokenTtl::minutes(5))
            .await
            .unwrap();

        let refusal = authenticate(&state, "not-a-uuid", Some(&token.token))
            .await
            .err()
            .unwrap();
        assert_eq!(refusal.code, CLOSE_POLICY_VIOLATION);
    }

    #[tokio::test]
    async fn non_participant_is_a_policy_refusal() {
        let state = test_state().await;
        let patient = seed_user(&state, UserRole::Patient).await;
        let doctor = seed_user(&state, UserRole::Doctor).await;
        let outsider = seed_user(&state, UserRole::Patient).await;
        let consultation = seed_consultation(&state, &patient, &doctor).await;

        let token = state
            .token_repo
            .issue(&outsider.id, TokenTtl::minutes(5))
            .await
            .unwrap();

        let refusal = authenticate(&state, &consultation.id.to_string(), Some(&token.token))
            .await
            .err()
            .unwrap();
        assert_eq!(refusal.code, CLOSE_POLICY_VIOLATION);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn valid_handshake_resolves_user_and_consultation() {
        let state = test_state().await;
        let patient = seed_user(&state, UserRole::Patient).await;
        let doctor = seed_user(&state, UserRole::Doctor).await;
        let consultation = seed_consultation(&state, &patient, &doctor).await;

        let token = state
            .token_repo
            .issue(&doctor.id, TokenTtl::minutes(5))
            .await
            .unwrap();

        let (user, resolved) =
            authenticate(&state, &consultation.id.to_string(), Some(&token.token))
                .await
                .ok()
                .unwrap();
        assert_eq!(user.id, doctor.id);
        assert_eq!(resolved.id, consultation.id);
    }
}
