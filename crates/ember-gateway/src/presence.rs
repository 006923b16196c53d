use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use ember_types::events::GatewayEvent;

/// Handle to a user's live gateway connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// Push an event into the connection's send queue. Returns false if
    /// the connection is already tearing down.
    pub fn deliver(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Process-wide map of user id -> active connection. Owned by the server
/// and injected into the Dispatcher and the HTTP state; entries exist
/// only while a connection is open and never outlive it.
///
/// At most one connection per user: a second connection displaces the
/// first. Cleanup is conn-id-guarded so the displaced connection's late
/// teardown cannot evict its successor.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a user's connection, displacing any prior one.
    /// Returns the connection id needed to clear the entry later.
    pub async fn set_online(
        &self,
        user_id: Uuid,
        tx: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .entries
            .write()
            .await
            .insert(user_id, ConnectionHandle { conn_id, tx });
        conn_id
    }

    /// Remove the user's entry, but only if `conn_id` still owns it.
    /// Returns whether an entry was removed.
    pub async fn clear(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut entries = self.inner.entries.write().await;
        match entries.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// The user's live connection, or None. Absence means realtime
    /// delivery is impossible and callers fall back to offline semantics.
    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.entries.read().await.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.entries.read().await.contains_key(&user_id)
    }

    /// Deliver an event to a user's connection if present.
    /// Returns whether the event was handed to a live connection.
    pub async fn send(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.lookup(user_id).await {
            Some(handle) => handle.deliver(event),
            None => false,
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<GatewayEvent>,
        mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn lookup_reflects_connect_and_disconnect() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        assert!(!registry.is_online(user).await);
        assert!(registry.lookup(user).await.is_none());

        let (tx, _rx) = channel();
        let conn = registry.set_online(user, tx).await;
        assert!(registry.is_online(user).await);

        assert!(registry.clear(user, conn).await);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn second_connection_displaces_the_first() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let conn1 = registry.set_online(user, tx1).await;
        let _conn2 = registry.set_online(user, tx2).await;

        assert!(registry.send(user, GatewayEvent::Ready { user_id: user }).await);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        // The displaced connection's teardown must not evict its successor.
        assert!(!registry.clear(user, conn1).await);
        assert!(registry.is_online(user).await);
    }

    #[tokio::test]
    async fn delivery_to_an_absent_user_reports_failure() {
        let registry = PresenceRegistry::new();
        let user = Uuid::new_v4();

        assert!(!registry.send(user, GatewayEvent::CallEnded).await);
    }
}
