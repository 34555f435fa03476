//! Event fan-out to the connections of a consultation.
//!
//! Failures are peer-level housekeeping, never faults in the consultation's
//! state: a connection that cannot accept the frame within the send timeout
//! is swept out of the registry, and the caller only ever sees the delivered
//! count.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use telemed_types::protocol::ServerEvent;
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::{ConnectionHandle, ConnectionRegistry};

/// Fan-out engine over the connection registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `event` to every connection registered to the consultation.
    ///
    /// Serializes once, snapshots the registry, then attempts a bounded send
    /// per connection in snapshot order, so each live connection receives
    /// the event at most once. Every failed connection is unregistered from
    /// both indices exactly once, with repeats across the batch deduplicated.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, consultation_id: &Uuid, event: &ServerEvent) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast event");
                return 0;
            }
        };

        let snapshot = self
            .registry
            .connections_for_consultation(consultation_id)
            .await;
        if snapshot.is_empty() {
            return 0;
        }

        let mut delivered = 0usize;
        let mut failed: Vec<Arc<ConnectionHandle>> = Vec::new();
        let mut failed_ids: HashSet<Uuid> = HashSet::new();

        for conn in &snapshot {
            if conn.send_timeout(Arc::clone(&frame), self.send_timeout).await {
                delivered += 1;
            } else if failed_ids.insert(conn.id) {
                failed.push(Arc::clone(conn));
            }
        }

        if !failed.is_empty() {
            for conn in &failed {
                warn!(
                    conn_id = %conn.id,
                    consultation_id = %consultation_id,
                    "dropping unresponsive connection"
                );
                self.registry.unregister(conn).await;
            }
        }

        debug!(
            consultation_id = %consultation_id,
            recipients = snapshot.len(),
            delivered,
            dropped = failed.len(),
            "broadcast event"
        );

        delivered
    }

    /// Deliver `event` to a single connection (direct reply path).
    ///
    /// Returns false when the connection could not accept the frame.
    pub async fn send_to(&self, conn: &ConnectionHandle, event: &ServerEvent) -> bool {
        let frame = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize reply event");
                return false;
            }
        };
        conn.send_timeout(frame, self.send_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection(
        user_id: Uuid,
        consultation_id: Uuid,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(ConnectionHandle::new(user_id, consultation_id, tx)),
            rx,
        )
    }

    fn broadcaster(registry: Arc<ConnectionRegistry>) -> Broadcaster {
        Broadcaster::new(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn broadcast_reaches_all_registered_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();
        let (conn_a, mut rx_a) = make_connection(Uuid::now_v7(), consultation, 8);
        let (conn_b, mut rx_b) = make_connection(Uuid::now_v7(), consultation, 8);
        registry.register(Arc::clone(&conn_a)).await;
        registry.register(Arc::clone(&conn_b)).await;

        let delivered = broadcaster(Arc::clone(&registry))
            .broadcast(&consultation, &ServerEvent::Pong)
            .await;

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_skips_other_consultations() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation_a = Uuid::now_v7();
        let consultation_b = Uuid::now_v7();
        let (conn_a, mut rx_a) = make_connection(Uuid::now_v7(), consultation_a, 8);
        let (conn_b, mut rx_b) = make_connection(Uuid::now_v7(), consultation_b, 8);
        registry.register(Arc::clone(&conn_a)).await;
        registry.register(Arc::clone(&conn_b)).await;

        let delivered = broadcaster(Arc::clone(&registry))
            .broadcast(&consultation_a, &ServerEvent::Pong)
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_empty_consultation_is_a_no_op() {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivered = broadcaster(registry)
            .broadcast(&Uuid::now_v7(), &ServerEvent::Pong)
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn failed_connection_is_removed_from_both_indices() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();
        let user = Uuid::now_v7();

        // Dead connection: receiver dropped immediately.
        let (dead, rx_dead) = make_connection(user, consultation, 1);
        drop(rx_dead);
        let (live, mut rx_live) = make_connection(Uuid::now_v7(), consultation, 8);

        registry.register(Arc::clone(&dead)).await;
        registry.register(Arc::clone(&live)).await;

        let delivered = broadcaster(Arc::clone(&registry))
            .broadcast(&consultation, &ServerEvent::Pong)
            .await;

        assert_eq!(delivered, 1);
        assert!(rx_live.try_recv().is_ok());
        // The dead connection is gone from both indices; the live one stays.
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.connections_for_user(&user).await.is_empty());
        let remaining = registry.connections_for_consultation(&consultation).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, live.id);
    }

    #[tokio::test]
    async fn slow_connection_times_out_and_is_swept() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();

        // Queue of 1 that nobody drains: first frame fits, second times out.
        let (slow, _rx_kept_but_not_drained) = make_connection(Uuid::now_v7(), consultation, 1);
        registry.register(Arc::clone(&slow)).await;

        let engine = broadcaster(Arc::clone(&registry));
        assert_eq!(engine.broadcast(&consultation, &ServerEvent::Pong).await, 1);
        assert_eq!(engine.broadcast(&consultation, &ServerEvent::Pong).await, 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn each_connection_receives_event_at_most_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();
        let (conn, mut rx) = make_connection(Uuid::now_v7(), consultation, 8);
        registry.register(Arc::clone(&conn)).await;

        broadcaster(Arc::clone(&registry))
            .broadcast(&consultation, &ServerEvent::Pong)
            .await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_share_one_serialization() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();
        let (conn_a, mut rx_a) = make_connection(Uuid::now_v7(), consultation, 8);
        let (conn_b, mut rx_b) = make_connection(Uuid::now_v7(), consultation, 8);
        registry.register(Arc::clone(&conn_a)).await;
        registry.register(Arc::clone(&conn_b)).await;

        broadcaster(Arc::clone(&registry))
            .broadcast(&consultation, &ServerEvent::Pong)
            .await;

        let frame_a = rx_a.recv().await.unwrap();
        let frame_b = rx_b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&frame_a, &frame_b));
        assert_eq!(&*frame_a, r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn send_to_reaches_only_the_target() {
        let registry = Arc::new(ConnectionRegistry::new());
        let consultation = Uuid::now_v7();
        let (conn_a, mut rx_a) = make_connection(Uuid::now_v7(), consultation, 8);
        let (conn_b, mut rx_b) = make_connection(Uuid::now_v7(), consultation, 8);
        registry.register(Arc::clone(&conn_a)).await;
        registry.register(Arc::clone(&conn_b)).await;

        let ok = broadcaster(Arc::clone(&registry))
            .send_to(&conn_a, &ServerEvent::Pong)
            .await;

        assert!(ok);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
