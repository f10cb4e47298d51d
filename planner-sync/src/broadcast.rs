//! Per-room fan-out of encoded frames with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` frames; slow receivers observe `Lagged` instead of blocking
//! the writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::protocol::{ClientId, ProtocolError, RoomId, SyncMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single room.
///
/// Every connection subscribed to the room holds one receiver. Frames are
/// delivered to all of them, the author included.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    /// Subscribed clients and how many connections each has open
    peers: RwLock<HashMap<ClientId, usize>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Register a subscriber and hand back its receiver.
    pub async fn add_peer(&self, client_id: ClientId) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().await;
        *peers.entry(client_id).or_insert(0) += 1;
        self.sender.subscribe()
    }

    /// Drop one connection of `client_id`. Returns true when the client has
    /// no connections left in this room.
    pub async fn remove_peer(&self, client_id: &ClientId) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(client_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                peers.remove(client_id);
                true
            }
            None => false,
        }
    }

    /// Encode once and send to every receiver. Returns the receiver count.
    pub fn broadcast(&self, msg: &SyncMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.broadcast_raw(Arc::new(encoded)))
    }

    /// Broadcast pre-encoded bytes directly.
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Distinct clients subscribed.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, client_id: &ClientId) -> bool {
        self.peers.read().await.contains_key(client_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peer_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Room manager: maps room ids to broadcast groups.
pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    pub async fn get(&self, room: &RoomId) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Get or create the group for `room`.
    pub async fn get_or_create(&self, room: &RoomId) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        if let Some(group) = self.get(room).await {
            return group;
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(group) = rooms.get(room) {
            return group.clone();
        }

        let group = Arc::new(BroadcastGroup::new(self.default_capacity));
        rooms.insert(room.clone(), group.clone());
        group
    }

    /// Remove the group for `room` if nobody is subscribed.
    pub async fn remove_if_empty(&self, room: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(group) = rooms.get(room) {
            if group.peer_count().await == 0 {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
