use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::models::ServerMessage;

/// Capacity of each per-case broadcast channel. Slow receivers that fall
/// behind will skip messages (RecvError::Lagged).
const ROOM_CHANNEL_CAPACITY: usize = 256;

/// Per-case broadcast groups for connections on this instance.
///
/// A group is a runtime artifact only: it is created when the first local
/// connection subscribes and pruned once a broadcast finds no receivers.
/// Nothing here is authoritative about who is viewing a case; that lives in
/// the backing store.
#[derive(Clone)]
pub struct CaseRooms {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<ServerMessage>>>>,
}

impl CaseRooms {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe a connection to a case's broadcast group, creating the
    /// group if this is the first local subscriber.
    pub async fn subscribe(&self, case_reference: &str) -> broadcast::Receiver<ServerMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(case_reference.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a message to every connection subscribed to the case on this
    /// instance. A case without local subscribers is skipped, and its
    /// channel entry is pruned.
    pub async fn broadcast(&self, case_reference: &str, message: ServerMessage) {
        let sender = {
            let channels = self.channels.read().await;
            channels.get(case_reference).cloned()
        };

        let Some(sender) = sender else {
            return;
        };

        if sender.send(message).is_err() {
            // No receivers left; drop the empty group
            let mut channels = self.channels.write().await;
            if channels
                .get(case_reference)
                .is_some_and(|s| s.receiver_count() == 0)
            {
                channels.remove(case_reference);
            }
        }
    }

    /// Number of active broadcast groups on this instance.
    pub async fn room_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for CaseRooms {
    fn default() -> Self {
        Self::new()
    }
}
