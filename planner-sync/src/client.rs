//! WebSocket client for the sync server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect detection, reconnect with backoff)
//! - Room subscription with snapshot / missing / update routing
//! - Whole-document writes acknowledged by the server
//!
//! There is no offline queue: a write made while disconnected fails, and
//! the session marks its document dirty so the next flush carries it.
//! The room feed survives a reconnect; the subscription is re-sent and the
//! server answers with a fresh snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use planner_core::model::Document;

use crate::channel::{ChannelError, RemoteChannel, RemoteSignal, Subscription, WriteMeta};
use crate::protocol::{ClientId, Envelope, MessageType, RoomId, SyncMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// How long a write waits for the server's Ack
    pub write_timeout: Duration,
    /// Outgoing frame buffer
    pub outgoing_capacity: usize,
    /// First reconnect delay; doubled after every failed attempt
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Give up after this many failed attempts (None = never)
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            outgoing_capacity: 256,
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(10),
            max_reconnect_attempts: None,
        }
    }
}

impl ClientConfig {
    pub fn for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            outgoing_capacity: 64,
            reconnect_initial: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(500),
            max_reconnect_attempts: None,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.reconnect_initial
            .saturating_mul(factor)
            .min(self.reconnect_max)
    }
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// Link lost; the background task is dialing again
    Reconnecting,
    /// Gave up reconnecting
    Disconnected,
}

type PendingWrites = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), ChannelError>>>>>;

/// Where signals for the subscribed room go.
struct RoomFeed {
    room: RoomId,
    token: u64,
    tx: mpsc::UnboundedSender<RemoteSignal>,
}

type Feed = Arc<Mutex<Option<RoomFeed>>>;

/// The sync client.
///
/// One connection follows one room at a time; subscribing again switches
/// rooms and ends the previous subscription. Writes may target any room.
pub struct SyncClient {
    client_id: ClientId,
    server_url: String,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: mpsc::Sender<Vec<u8>>,
    pending: PendingWrites,
    feed: Feed,
    next_seq: AtomicU64,
    next_token: AtomicU64,
}

impl SyncClient {
    /// Connect to `server_url` (e.g. `ws://127.0.0.1:9090`).
    ///
    /// The first dial must succeed. Afterwards a background task owns the
    /// socket, routes incoming frames and redials whenever the link drops.
    pub async fn connect(
        server_url: impl Into<String>,
        client_id: ClientId,
        config: ClientConfig,
    ) -> Result<Self, ChannelError> {
        let server_url = server_url.into();
        let ws_stream = open(&server_url, config.connect_timeout).await?;

        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(config.outgoing_capacity);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let pending: PendingWrites = Arc::new(Mutex::new(HashMap::new()));
        let feed: Feed = Arc::new(Mutex::new(None));

        let link = Link {
            url: server_url.clone(),
            client_id: client_id.clone(),
            config: config.clone(),
            state: state.clone(),
            pending: pending.clone(),
            feed: feed.clone(),
        };
        tokio::spawn(link.run(ws_stream, out_rx));

        log::info!("Connected to {server_url} as {client_id}");
        Ok(Self {
            client_id,
            server_url,
            config,
            state,
            outgoing_tx: out_tx,
            pending,
            feed,
            next_seq: AtomicU64::new(1),
            next_token: AtomicU64::new(1),
        })
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Send a heartbeat ping.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        self.send(&SyncMessage::ping(&self.client_id)).await
    }

    async fn ensure_connected(&self) -> Result<(), ChannelError> {
        match *self.state.read().await {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                Err(ChannelError::Disconnected)
            }
        }
    }

    async fn send(&self, msg: &SyncMessage) -> Result<(), ChannelError> {
        let encoded = msg.encode()?;
        self.outgoing_tx
            .send(encoded)
            .await
            .map_err(|_| ChannelError::Disconnected)
    }

    fn forget(&self, seq: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&seq);
        }
    }
}

impl RemoteChannel for SyncClient {
    async fn subscribe(&self, room: &RoomId) -> Result<Subscription, ChannelError> {
        self.ensure_connected().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut feed = self.feed.lock().map_err(|_| ChannelError::Disconnected)?;
            if let Some(previous) = feed.replace(RoomFeed {
                room: room.clone(),
                token,
                tx,
            }) {
                log::info!("Switching subscription from room {} to {room}", previous.room);
            }
        }
        self.send(&SyncMessage::subscribe(&self.client_id, room)).await?;

        let feed = self.feed.clone();
        let outgoing = self.outgoing_tx.clone();
        let client_id = self.client_id.clone();
        let detached_room = room.clone();
        Ok(Subscription::new(room.clone(), rx, move || {
            let Ok(mut feed) = feed.lock() else { return };
            if feed.as_ref().is_some_and(|f| f.token == token) {
                feed.take();
                if let Ok(bytes) = SyncMessage::unsubscribe(&client_id, &detached_room).encode() {
                    let _ = outgoing.try_send(bytes);
                }
            }
        }))
    }

    async fn write(
        &self,
        room: &RoomId,
        document: &Document,
        meta: WriteMeta,
    ) -> Result<(), ChannelError> {
        self.ensure_connected().await?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(document.clone(), meta.client_id, meta.updated_at_ms);
        let msg = SyncMessage::write(&self.client_id, room, seq, &envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| ChannelError::Disconnected)?
            .insert(seq, tx);

        if let Err(e) = self.send(&msg).await {
            self.forget(seq);
            return Err(e);
        }

        match tokio::time::timeout(self.config.write_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Disconnected),
            Err(_) => {
                self.forget(seq);
                Err(ChannelError::Timeout)
            }
        }
    }
}

async fn open(url: &str, timeout: Duration) -> Result<WsStream, ChannelError> {
    let (ws_stream, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| ChannelError::Timeout)?
        .map_err(|e| ChannelError::Connect(e.to_string()))?;
    Ok(ws_stream)
}

/// Background side of a [`SyncClient`]: owns the socket across reconnects.
struct Link {
    url: String,
    client_id: ClientId,
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    pending: PendingWrites,
    feed: Feed,
}

impl Link {
    async fn run(self, mut ws_stream: WsStream, mut outgoing: mpsc::Receiver<Vec<u8>>) {
        loop {
            if !self.pump(ws_stream, &mut outgoing).await {
                // every sender dropped: the client is gone
                return;
            }

            *self.state.write().await = ConnectionState::Reconnecting;
            fail_pending(&self.pending);
            log::warn!("Lost connection to {}; reconnecting", self.url);

            match self.reconnect(&mut outgoing).await {
                Some(next) => ws_stream = next,
                None => {
                    *self.state.write().await = ConnectionState::Disconnected;
                    if let Ok(mut feed) = self.feed.lock() {
                        feed.take();
                    }
                    log::info!("Disconnected from {}", self.url);
                    return;
                }
            }
        }
    }

    /// Shuttle frames until the socket drops (true) or the client is
    /// dropped (false).
    async fn pump(&self, ws_stream: WsStream, outgoing: &mut mpsc::Receiver<Vec<u8>>) -> bool {
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        loop {
            tokio::select! {
                frame = outgoing.recv() => match frame {
                    Some(data) => {
                        if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                            return true;
                        }
                    }
                    None => {
                        let _ = ws_writer.close().await;
                        return false;
                    }
                },
                msg = ws_reader.next() => match msg {
                    Some(Ok(Message::Binary(data))) => match SyncMessage::decode(&data) {
                        Ok(sync_msg) => route(sync_msg, &self.pending, &self.feed),
                        Err(e) => log::warn!("Failed to decode frame from {}: {e}", self.url),
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return true,
                    _ => {}
                },
            }
        }
    }

    /// Dial until it works, the attempts run out or the client goes away.
    async fn reconnect(&self, outgoing: &mut mpsc::Receiver<Vec<u8>>) -> Option<WsStream> {
        let mut attempt = 0u32;
        loop {
            if self
                .config
                .max_reconnect_attempts
                .is_some_and(|max| attempt >= max)
            {
                log::warn!("Giving up on {} after {attempt} attempt(s)", self.url);
                return None;
            }

            // Frames queued while the link is down belong to operations
            // that already failed.
            let delay = tokio::time::sleep(self.config.backoff(attempt));
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    frame = outgoing.recv() => {
                        if frame.is_none() {
                            return None;
                        }
                        log::debug!("Dropping frame queued while disconnected");
                    }
                }
            }
            attempt += 1;

            let mut ws_stream = match open(&self.url, self.config.connect_timeout).await {
                Ok(ws_stream) => ws_stream,
                Err(e) => {
                    log::debug!("Reconnect attempt {attempt} to {} failed: {e}", self.url);
                    continue;
                }
            };
            while outgoing.try_recv().is_ok() {}

            match self.resubscribe(&mut ws_stream).await {
                Ok(()) => {
                    *self.state.write().await = ConnectionState::Connected;
                    log::info!("Reconnected to {} after {attempt} attempt(s)", self.url);
                    return Some(ws_stream);
                }
                Err(e) => log::debug!("Resubscribe on {} failed: {e}", self.url),
            }
        }
    }

    /// Re-send the subscription of the live room feed, if any.
    async fn resubscribe(&self, ws_stream: &mut WsStream) -> Result<(), ChannelError> {
        let room = self
            .feed
            .lock()
            .ok()
            .and_then(|feed| feed.as_ref().map(|f| f.room.clone()));
        let Some(room) = room else {
            return Ok(());
        };

        let frame = SyncMessage::subscribe(&self.client_id, &room).encode()?;
        ws_stream
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        log::info!("Resubscribed to room {room}");
        Ok(())
    }
}

/// Dispatch one server frame to the room feed or the waiting writer.
fn route(msg: SyncMessage, pending: &PendingWrites, feed: &Feed) {
    match msg.msg_type {
        MessageType::Snapshot | MessageType::Update => match msg.envelope() {
            Ok(envelope) => deliver(feed, &msg.room_id(), RemoteSignal::Envelope(envelope)),
            Err(e) => log::warn!("Dropping malformed envelope for room {}: {e}", msg.room),
        },
        MessageType::Missing => deliver(feed, &msg.room_id(), RemoteSignal::Missing),
        MessageType::Ack => settle(pending, msg.seq, Ok(())),
        MessageType::Nack => {
            let reason = msg.nack_reason().unwrap_or_default();
            settle(pending, msg.seq, Err(ChannelError::Rejected(reason)));
        }
        MessageType::Pong => log::trace!("Pong from server"),
        other => log::debug!("Unhandled message type: {other:?}"),
    }
}

fn deliver(feed: &Feed, room: &RoomId, signal: RemoteSignal) {
    let Ok(feed) = feed.lock() else { return };
    match feed.as_ref() {
        Some(f) if &f.room == room => {
            let _ = f.tx.send(signal);
        }
        _ => log::debug!("Ignoring signal for unsubscribed room {room}"),
    }
}

fn settle(pending: &PendingWrites, seq: u64, result: Result<(), ChannelError>) {
    let waiter = pending.lock().ok().and_then(|mut p| p.remove(&seq));
    match waiter {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => log::debug!("No pending write for seq {seq}"),
    }
}

fn fail_pending(pending: &PendingWrites) {
    if let Ok(mut pending) = pending.lock() {
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ChannelError::Disconnected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_for(room: &RoomId) -> (Feed, mpsc::UnboundedReceiver<RemoteSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = Arc::new(Mutex::new(Some(RoomFeed {
            room: room.clone(),
            token: 1,
            tx,
        })));
        (feed, rx)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.outgoing_capacity, 256);
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = ClientConfig::for_testing();
        assert_eq!(config.backoff(0), Duration::from_millis(50));
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_route_delivers_only_subscribed_room() {
        let room = RoomId::new("SGA");
        let (feed, mut rx) = feed_for(&room);
        let pending: PendingWrites = Arc::new(Mutex::new(HashMap::new()));

        route(SyncMessage::missing(&RoomId::new("other")), &pending, &feed);
        assert!(rx.try_recv().is_err());

        route(SyncMessage::missing(&room), &pending, &feed);
        assert_eq!(rx.try_recv().unwrap(), RemoteSignal::Missing);

        let env = Envelope::new(Document::seed(), ClientId::generate(), 5);
        route(
            SyncMessage::update(env.meta.updated_by.as_str(), &room, env.to_bytes().unwrap()),
            &pending,
            &feed,
        );
        assert_eq!(rx.try_recv().unwrap(), RemoteSignal::Envelope(env));
    }

    #[test]
    fn test_route_settles_writes() {
        let room = RoomId::default();
        let (feed, _rx) = feed_for(&room);
        let pending: PendingWrites = Arc::new(Mutex::new(HashMap::new()));

        let (ok_tx, mut ok_rx) = oneshot::channel();
        let (nack_tx, mut nack_rx) = oneshot::channel();
        pending.lock().unwrap().insert(1, ok_tx);
        pending.lock().unwrap().insert(2, nack_tx);

        route(SyncMessage::ack(&room, 1), &pending, &feed);
        route(SyncMessage::nack(&room, 2, "room full"), &pending, &feed);

        assert_eq!(ok_rx.try_recv().unwrap(), Ok(()));
        assert_eq!(
            nack_rx.try_recv().unwrap(),
            Err(ChannelError::Rejected("room full".into()))
        );
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fail_pending_on_disconnect() {
        let pending: PendingWrites = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(9, tx);

        fail_pending(&pending);
        assert_eq!(rx.try_recv().unwrap(), Err(ChannelError::Disconnected));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = SyncClient::connect(
            format!("ws://127.0.0.1:{port}"),
            ClientId::generate(),
            ClientConfig::for_testing(),
        )
        .await;
        assert!(matches!(result, Err(ChannelError::Connect(_))));
    }
}
