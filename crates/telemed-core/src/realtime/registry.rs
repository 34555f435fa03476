//! Connection registry: live WebSocket connections indexed two ways.
//!
//! Every connection appears in a per-user bucket and a per-consultation
//! bucket. Both indices live behind a single lock so that add/remove keeps
//! them consistent; there is no state in which one index references a
//! connection the other has forgotten.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// One live connection's handle: identity, consultation binding, and the
/// outbound frame queue drained by the connection's write half.
///
/// The handle is transport-agnostic; senders enqueue serialized frames and
/// the session task forwards them to the socket.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub consultation_id: Uuid,
    sender: mpsc::Sender<Arc<String>>,
}

impl ConnectionHandle {
    pub fn new(
        user_id: Uuid,
        consultation_id: Uuid,
        sender: mpsc::Sender<Arc<String>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            consultation_id,
            sender,
        }
    }

    /// Enqueue a frame, waiting at most `timeout` for queue space.
    ///
    /// Returns false when the queue stayed full through the timeout or the
    /// receiving half is gone. Either way the connection is considered dead
    /// by the broadcast sweep.
    pub async fn send_timeout(&self, frame: Arc<String>, timeout: Duration) -> bool {
        self.sender.send_timeout(frame, timeout).await.is_ok()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("consultation_id", &self.consultation_id)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<Uuid, HashMap<Uuid, Arc<ConnectionHandle>>>,
    by_consultation: HashMap<Uuid, HashMap<Uuid, Arc<ConnectionHandle>>>,
}

/// Process-wide registry of live connections.
///
/// All operations are individually atomic; snapshots are point-in-time
/// copies immune to concurrent mutation during iteration.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    /// Atomic counter tracking registered connections (avoids read-locking
    /// for count queries).
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection to both indices. Registering an already-registered
    /// connection is a no-op.
    pub async fn register(&self, conn: Arc<ConnectionHandle>) {
        let mut inner = self.inner.write().await;
        let fresh = inner
            .by_user
            .entry(conn.user_id)
            .or_default()
            .insert(conn.id, Arc::clone(&conn))
            .is_none();
        inner
            .by_consultation
            .entry(conn.consultation_id)
            .or_default()
            .insert(conn.id, Arc::clone(&conn));
        if fresh {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
            debug!(
                conn_id = %conn.id,
                user_id = %conn.user_id,
                consultation_id = %conn.consultation_id,
                "connection registered"
            );
        }
    }

    /// Remove a connection from both indices wherever present. Removing a
    /// never-registered or already-removed connection is a no-op.
    pub async fn unregister(&self, conn: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        let mut removed = false;
        if let Some(bucket) = inner.by_user.get_mut(&conn.user_id) {
            removed |= bucket.remove(&conn.id).is_some();
            if bucket.is_empty() {
                inner.by_user.remove(&conn.user_id);
            }
        }
        if let Some(bucket) = inner.by_consultation.get_mut(&conn.consultation_id) {
            removed |= bucket.remove(&conn.id).is_some();
            if bucket.is_empty() {
                inner.by_consultation.remove(&conn.consultation_id);
            }
        }
        if removed {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            debug!(conn_id = %conn.id, "connection unregistered");
        }
    }

    /// Point-in-time copy of the connections registered to a consultation.
    pub async fn connections_for_consultation(
        &self,
        consultation_id: &Uuid,
    ) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .by_consultation
            .get(consultation_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Point-in-time copy of the connections belonging to a user.
    pub async fn connections_for_user(&self, user_id: &Uuid) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(user_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
