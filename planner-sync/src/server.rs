//! WebSocket sync server with room-based envelope routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room ── latest envelope ── BroadcastGroup
//! Client B ──┘                 │
//!                              ├── RoomStore (RocksDB, LZ4)
//!                              │
//!                   ┌──────────┼───────────┐
//!                   ▼          ▼           ▼
//!                Client A   Client B    Client C
//! ```
//!
//! The server is a dumb last-write store: it keeps the bytes of the most
//! recent envelope per room and relays every accepted write to the room's
//! subscribers, the author included. It never compares timestamps; ordering
//! is the clients' business.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::RoomManager;
use crate::protocol::{ClientId, Envelope, MessageType, RoomId, SyncMessage};
use crate::storage::{RoomStore, StoreConfig, StoreError, WriteStamp};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum subscribed clients per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Relay a write back to the connection that made it
    pub echo_to_author: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            storage_path: None,
            echo_to_author: true,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub writes_accepted: u64,
    pub writes_rejected: u64,
    pub persisted_envelopes: u64,
}

/// State shared by all connections.
struct Shared {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    /// Latest envelope bytes per room, stored verbatim
    latest: RwLock<HashMap<RoomId, Arc<Vec<u8>>>>,
    stats: RwLock<ServerStats>,
    store: Option<Arc<RoomStore>>,
    /// Flips to true once; stops the accept loop and every connection
    shutdown: watch::Sender<bool>,
}

impl Shared {
    /// Latest envelope of `room`: memory first, then storage.
    async fn latest_envelope(&self, room: &RoomId) -> Option<Arc<Vec<u8>>> {
        if let Some(bytes) = self.latest.read().await.get(room) {
            return Some(bytes.clone());
        }
        let store = self.store.as_ref()?;
        match store.load_envelope(room) {
            Ok(bytes) => {
                let bytes = Arc::new(bytes);
                self.latest
                    .write()
                    .await
                    .entry(room.clone())
                    .or_insert_with(|| bytes.clone());
                log::info!("Loaded persisted envelope for room {room}");
                Some(bytes)
            }
            Err(StoreError::NotFound(_)) => None,
            Err(e) => {
                log::error!("Failed to load envelope for room {room}: {e}");
                None
            }
        }
    }
}

/// A connection's current subscription.
struct Joined {
    client_id: ClientId,
    room: RoomId,
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
}

/// The sync server.
pub struct SyncServer {
    shared: Arc<Shared>,
}

impl SyncServer {
    /// Create a new sync server, opening storage if configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Some(Arc::new(RoomStore::open(store_config)?))
            }
            None => None,
        };
        Ok(Self::with_store(config, store))
    }

    fn with_store(config: ServerConfig, store: Option<Arc<RoomStore>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                rooms: Arc::new(RoomManager::new(config.broadcast_capacity)),
                config,
                latest: RwLock::new(HashMap::new()),
                stats: RwLock::new(ServerStats::default()),
                store,
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), None)
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Load every persisted room's envelope into memory.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let store = match &self.shared.store {
            Some(s) => s,
            None => return Ok(0),
        };

        let rooms = store.list_rooms()?;
        let mut recovered = 0;
        let mut latest = self.shared.latest.write().await;
        for room in &rooms {
            match store.load_envelope(room) {
                Ok(bytes) => {
                    latest.insert(room.clone(), Arc::new(bytes));
                    recovered += 1;
                    log::info!("Recovered room {room} from storage");
                }
                Err(e) => log::warn!("Skipping room {room}: {e}"),
            }
        }

        log::info!("Recovery complete: {recovered}/{} rooms restored", rooms.len());
        Ok(recovered)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop until [`SyncServer::shutdown`] is
    /// called. Call from an async runtime.
    pub async fn run(&self) -> Result<(), BoxError> {
        let recovered = self.recover().await?;
        if recovered > 0 {
            log::info!("Recovered {recovered} rooms from persistent storage");
        }

        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.shared.config.bind_addr);

        let mut stop = self.shared.shutdown.subscribe();
        if *stop.borrow_and_update() {
            return Ok(());
        }
        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = stop.changed() => {
                    log::info!("Sync server on {} shutting down", self.shared.config.bind_addr);
                    return Ok(());
                }
            };
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut joined: Option<Joined> = None;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(
            shared.config.heartbeat_interval_secs.max(1),
        ));
        heartbeat.tick().await;
        let mut stop = shared.shutdown.subscribe();
        let stopping = *stop.borrow_and_update();

        let result = async {
            if stopping {
                let _ = ws_sender.send(Message::Close(None)).await;
                return Ok(());
            }
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = shared.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            match SyncMessage::decode(&data) {
                                Ok(sync_msg) => {
                                    Self::handle_message(sync_msg, &shared, &mut joined, &mut ws_sender)
                                        .await?;
                                }
                                Err(e) => log::warn!("Failed to decode message from {addr}: {e}"),
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    },

                    // Outgoing room traffic
                    msg = async {
                        match joined.as_mut() {
                            Some(j) => j.rx.recv().await,
                            // Not subscribed yet: wait forever
                            None => std::future::pending().await,
                        }
                    } => match msg {
                        Ok(data) => {
                            if !shared.config.echo_to_author && Self::authored_by(&data, &joined) {
                                continue;
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Connection {addr} lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            joined = None;
                        }
                    },

                    _ = heartbeat.tick() => {
                        ws_sender.send(Message::Ping(Vec::new().into())).await?;
                    }

                    _ = stop.changed() => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        log::info!("Closing connection from {addr} for shutdown");
                        break;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        // Cleanup: leave the room
        if let Some(j) = joined.take() {
            Self::leave(&shared, j).await;
        }
        {
            let room_count = shared.rooms.room_count().await;
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
            s.active_rooms = room_count;
        }

        result
    }

    fn authored_by(data: &[u8], joined: &Option<Joined>) -> bool {
        match (SyncMessage::decode(data), joined) {
            (Ok(msg), Some(j)) => msg.client_id == j.client_id.as_str(),
            _ => false,
        }
    }

    async fn handle_message(
        sync_msg: SyncMessage,
        shared: &Arc<Shared>,
        joined: &mut Option<Joined>,
        ws_sender: &mut WsSink,
    ) -> Result<(), BoxError> {
        match sync_msg.msg_type {
            MessageType::Subscribe => {
                let room = sync_msg.room_id();
                let client_id = ClientId::parse(&sync_msg.client_id)
                    .unwrap_or_else(ClientId::generate);

                // One room per connection
                if let Some(previous) = joined.take() {
                    Self::leave(shared, previous).await;
                }

                let group = shared.rooms.get_or_create(&room).await;
                if group.peer_count().await >= shared.config.max_peers_per_room
                    && !group.has_peer(&client_id).await
                {
                    log::warn!("Room {room} is full; refusing {client_id}");
                    shared.rooms.remove_if_empty(&room).await;
                    let nack = SyncMessage::nack(&room, 0, "room is full");
                    ws_sender.send(Message::Binary(nack.encode()?.into())).await?;
                    return Ok(());
                }

                let rx = group.add_peer(client_id.clone()).await;
                *joined = Some(Joined {
                    client_id: client_id.clone(),
                    room: room.clone(),
                    rx,
                });

                let reply = match shared.latest_envelope(&room).await {
                    Some(bytes) => SyncMessage::snapshot(&room, bytes.to_vec()),
                    None => SyncMessage::missing(&room),
                };
                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;

                let room_count = shared.rooms.room_count().await;
                shared.stats.write().await.active_rooms = room_count;
                log::info!("Client {client_id} subscribed to room {room}");
            }

            MessageType::Write => {
                let room = sync_msg.room_id();
                let envelope = match Envelope::from_bytes(&sync_msg.payload) {
                    Ok(env) => env,
                    Err(e) => {
                        log::warn!("Rejecting write to room {room}: {e}");
                        shared.stats.write().await.writes_rejected += 1;
                        let nack = SyncMessage::nack(&room, sync_msg.seq, &e.to_string());
                        ws_sender.send(Message::Binary(nack.encode()?.into())).await?;
                        return Ok(());
                    }
                };

                let bytes = Arc::new(sync_msg.payload);
                shared
                    .latest
                    .write()
                    .await
                    .insert(room.clone(), bytes.clone());

                if let Some(store) = &shared.store {
                    let stamp = WriteStamp {
                        updated_at_ms: envelope.meta.updated_at_ms,
                        updated_by: envelope.meta.updated_by.as_str(),
                    };
                    match store.save_envelope(&room, &bytes, stamp) {
                        Ok(_) => shared.stats.write().await.persisted_envelopes += 1,
                        Err(e) => log::error!("Failed to persist envelope for room {room}: {e}"),
                    }
                }
                shared.stats.write().await.writes_accepted += 1;

                let ack = SyncMessage::ack(&room, sync_msg.seq);
                ws_sender.send(Message::Binary(ack.encode()?.into())).await?;

                if let Some(group) = shared.rooms.get(&room).await {
                    let update = SyncMessage::update(
                        envelope.meta.updated_by.as_str(),
                        &room,
                        bytes.to_vec(),
                    );
                    let _ = group.broadcast(&update);
                }
                log::debug!(
                    "Stored envelope {} by {} in room {room}",
                    envelope.meta.updated_at_ms,
                    envelope.meta.updated_by
                );
            }

            MessageType::Unsubscribe => {
                if let Some(j) = joined.take() {
                    if j.room == sync_msg.room_id() {
                        Self::leave(shared, j).await;
                    } else {
                        *joined = Some(j);
                    }
                }
            }

            MessageType::Ping => {
                let room = joined.as_ref().map(|j| j.room.to_string()).unwrap_or_default();
                let pong = SyncMessage::pong(&room);
                ws_sender.send(Message::Binary(pong.encode()?.into())).await?;
            }

            other => {
                log::debug!("Unhandled message type: {other:?}");
            }
        }
        Ok(())
    }

    async fn leave(shared: &Shared, joined: Joined) {
        let Joined {
            client_id,
            room,
            rx,
        } = joined;
        drop(rx);
        if let Some(group) = shared.rooms.get(&room).await {
            group.remove_peer(&client_id).await;
        }
        if shared.rooms.remove_if_empty(&room).await {
            log::info!("Room {room} removed (empty)");
        }
        log::debug!("Client {client_id} left room {room}");
    }

    /// Stop accepting connections and close the open ones. `run` returns
    /// once the listener is dropped; a stopped server cannot be restarted.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.shared.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.shared.config.bind_addr
    }

    /// Get room manager reference.
    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.shared.rooms
    }

    /// Get the persistent store (if configured).
    pub fn store(&self) -> Option<&Arc<RoomStore>> {
        self.shared.store.as_ref()
    }

    /// Latest envelope bytes held for `room`.
    pub async fn latest(&self, room: &RoomId) -> Option<Arc<Vec<u8>>> {
        self.shared.latest_envelope(room).await
    }
}
