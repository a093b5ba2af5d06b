use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use lexchat_types::events::ServerEvent;
use lexchat_types::models::Participant;

/// Authoritative map from participant to their single live connection.
/// Registry membership is what "online" means; presence transitions fan
/// out over the broadcast channel to every connected client, best-effort.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Presence fan-out; all connected clients receive all presence events
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// participant -> live connection entry
    connections: RwLock<HashMap<Participant, ConnectionEntry>>,
}

struct ConnectionEntry {
    conn_id: Uuid,
    name: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Registry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to presence events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Announce a presence transition to every connected client.
    /// No delivery guarantee: presence is UI state, never correctness.
    pub fn announce(&self, participant: Participant, name: String, online: bool) {
        let _ = self.inner.broadcast_tx.send(ServerEvent::PresenceUpdate {
            participant,
            name,
            online,
        });
    }

    /// Insert or supersede the connection for `participant` and announce
    /// online. A participant has at most one live connection; a later
    /// register simply replaces the earlier entry. Returns the connection
    /// handle plus the receiver end of the targeted event channel.
    pub async fn register(
        &self,
        participant: Participant,
        name: String,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.connections.write().await.insert(
            participant,
            ConnectionEntry {
                conn_id,
                name: name.clone(),
                tx,
            },
        );

        self.announce(participant, name, true);
        (conn_id, rx)
    }

    /// Remove the entry for `participant` and announce offline, but only
    /// if `conn_id` still owns it: the late disconnect of a superseded
    /// connection must not evict its successor. Idempotent: removing an
    /// absent entry is a no-op.
    pub async fn unregister(&self, participant: Participant, conn_id: Uuid) {
        let removed = {
            let mut connections = self.inner.connections.write().await;
            match connections.get(&participant) {
                Some(entry) if entry.conn_id == conn_id => connections.remove(&participant),
                _ => None,
            }
        };

        if let Some(entry) = removed {
            self.announce(participant, entry.name, false);
        }
    }

    /// Connection handle for `participant`, if they are online.
    pub async fn lookup(&self, participant: Participant) -> Option<Uuid> {
        self.inner
            .connections
            .read()
            .await
            .get(&participant)
            .map(|entry| entry.conn_id)
    }

    /// Push a targeted event to `participant`'s live connection. Returns
    /// false when they have no usable connection; a closed channel counts
    /// as offline, not as an error.
    pub async fn send_to(&self, participant: Participant, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&participant) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Snapshot of everyone currently online, replayed to a client that
    /// just connected so it sees who was already here.
    pub async fn online_participants(&self) -> Vec<(Participant, String)> {
        self.inner
            .connections
            .read()
            .await
            .iter()
            .map(|(p, entry)| (*p, entry.name.clone()))
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
