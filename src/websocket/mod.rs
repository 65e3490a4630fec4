use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod handlers;
pub mod message_types;

/// Unique identifier for one live WebSocket session.
///
/// A user keeps at most one live channel; reconnecting mints a new session id
/// and supersedes the old one. The id lets the superseded socket's cleanup
/// avoid tearing down the replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Session {
    id: SessionId,
    sender: UnboundedSender<String>,
}

/// Live-connection registry: user id -> single active channel.
///
/// Injected through `AppState` so a deployment can swap it for a distributed
/// pub/sub bridge; this in-process map assumes one instance owns all live
/// connections. Delivery is at-most-once: no channel means the event is
/// dropped and the client catches up on its next read.
#[derive(Default, Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user's channel, superseding any previous one.
    ///
    /// Dropping the previous sender ends the old socket's forwarding loop.
    pub async fn register(&self, user_id: Uuid) -> (SessionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let session_id = SessionId::new();

        let mut guard = self.inner.write().await;
        let previous = guard.insert(
            user_id,
            Session {
                id: session_id,
                sender: tx,
            },
        );
        if previous.is_some() {
            tracing::debug!(%user_id, "superseded previous live channel");
        }

        (session_id, rx)
    }

    /// Remove a user's channel, but only if it is still the given session.
    pub async fn unregister(&self, user_id: Uuid, session_id: SessionId) {
        let mut guard = self.inner.write().await;
        if guard.get(&user_id).map(|s| s.id) == Some(session_id) {
            guard.remove(&user_id);
            tracing::debug!(%user_id, "live channel closed");
        }
    }

    /// Deliver a payload to one user. Drops it silently when the user has no
    /// open channel; prunes the entry when the channel turned out dead.
    pub async fn send_to(&self, user_id: Uuid, payload: &str) {
        let mut guard = self.inner.write().await;
        if let Some(session) = guard.get(&user_id) {
            if session.sender.send(payload.to_string()).is_err() {
                guard.remove(&user_id);
                tracing::debug!(%user_id, "pruned dead channel");
            }
        }
    }

    pub async fn send_to_many(&self, user_ids: &[Uuid], payload: &str) {
        for user_id in user_ids {
            self.send_to(*user_id, payload).await;
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
