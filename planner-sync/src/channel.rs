//! Remote sync channel abstraction and an in-process implementation.
//!
//! A channel delivers, per room, an initial snapshot (or an explicit
//! "missing") on subscribe followed by every later write, tagged with the
//! writer's metadata verbatim. The writer is notified of its own writes too.
//! Ordering between notifications is not guaranteed by the contract.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use planner_core::model::Document;

use crate::protocol::{ClientId, Envelope, RoomId};

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSignal {
    Envelope(Envelope),
    /// The room has no document yet.
    Missing,
}

/// Metadata attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMeta {
    pub client_id: ClientId,
    pub updated_at_ms: u64,
}

/// Live feed of one room. Dropping it unsubscribes.
pub struct Subscription {
    room: RoomId,
    rx: mpsc::UnboundedReceiver<RemoteSignal>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        room: RoomId,
        rx: mpsc::UnboundedReceiver<RemoteSignal>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            room,
            rx,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Next signal, or `None` once the channel has gone away.
    pub async fn recv(&mut self) -> Option<RemoteSignal> {
        self.rx.recv().await
    }

    /// Stop receiving. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
            self.rx.close();
            log::debug!("Unsubscribed from room {}", self.room);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("room", &self.room)
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Remote document channel used by a sync session.
pub trait RemoteChannel: Send + Sync + 'static {
    fn subscribe(
        &self,
        room: &RoomId,
    ) -> impl Future<Output = Result<Subscription, ChannelError>> + Send;

    /// Store `document` as the room's latest envelope.
    fn write(
        &self,
        room: &RoomId,
        document: &Document,
        meta: WriteMeta,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// Channel errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// Channel reachable but not accepting operations
    Offline,
    /// Server refused the write
    Rejected(String),
    /// Connection dropped before the operation finished
    Disconnected,
    Timeout,
    Protocol(String),
    Connect(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "Channel offline"),
            Self::Rejected(reason) => write!(f, "Write rejected: {reason}"),
            Self::Disconnected => write!(f, "Channel disconnected"),
            Self::Timeout => write!(f, "Channel operation timed out"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Connect(e) => write!(f, "Connect error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<crate::protocol::ProtocolError> for ChannelError {
    fn from(e: crate::protocol::ProtocolError) -> Self {
        match e {
            crate::protocol::ProtocolError::ConnectionClosed => ChannelError::Disconnected,
            crate::protocol::ProtocolError::Timeout => ChannelError::Timeout,
            other => ChannelError::Protocol(other.to_string()),
        }
    }
}

// ─── In-process hub ──────────────────────────────────────────────────

#[derive(Default)]
struct HubRoom {
    latest: Option<Envelope>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<RemoteSignal>)>,
}

#[derive(Default)]
struct HubInner {
    rooms: HashMap<RoomId, HubRoom>,
    offline: bool,
    /// Latency added to every write before it is stored
    write_delay: Duration,
    writes: u64,
    next_subscriber: u64,
}

/// In-process channel shared by any number of sessions.
///
/// Behaves like the sync server: one latest envelope per room, writes stored
/// verbatim and fanned out to every subscriber including the author.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every subscribe and write fails with [`ChannelError::Offline`].
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline = offline;
        }
    }

    /// Hold every later write for `delay` before storing it.
    pub fn set_write_delay(&self, delay: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.write_delay = delay;
        }
    }

    /// Writes accepted so far, across rooms.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().map(|inner| inner.writes).unwrap_or(0)
    }

    pub fn latest(&self, room: &RoomId) -> Option<Envelope> {
        let inner = self.inner.lock().ok()?;
        inner.rooms.get(room)?.latest.clone()
    }

    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.rooms.get(room).map(|r| r.subscribers.len()))
            .unwrap_or(0)
    }

    /// Push `envelope` to the room's subscribers without storing it, as a
    /// late or duplicated notification would arrive.
    pub fn redeliver(&self, room: &RoomId, envelope: Envelope) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(hub_room) = inner.rooms.get_mut(room) {
                notify(hub_room, RemoteSignal::Envelope(envelope));
            }
        }
    }

    fn detach(&self, room: &RoomId, subscriber: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(hub_room) = inner.rooms.get_mut(room) {
                hub_room.subscribers.retain(|(id, _)| *id != subscriber);
            }
        }
    }
}

fn notify(room: &mut HubRoom, signal: RemoteSignal) {
    room.subscribers
        .retain(|(_, tx)| tx.send(signal.clone()).is_ok());
}

impl RemoteChannel for MemoryHub {
    async fn subscribe(&self, room: &RoomId) -> Result<Subscription, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = {
            let mut inner = self.inner.lock().map_err(|_| ChannelError::Disconnected)?;
            if inner.offline {
                return Err(ChannelError::Offline);
            }
            inner.next_subscriber += 1;
            let subscriber = inner.next_subscriber;
            let hub_room = inner.rooms.entry(room.clone()).or_default();
            let initial = match &hub_room.latest {
                Some(env) => RemoteSignal::Envelope(env.clone()),
                None => RemoteSignal::Missing,
            };
            // receiver is alive, cannot fail
            let _ = tx.send(initial);
            hub_room.subscribers.push((subscriber, tx));
            subscriber
        };

        let hub = self.clone();
        let detached_room = room.clone();
        Ok(Subscription::new(room.clone(), rx, move || {
            hub.detach(&detached_room, subscriber)
        }))
    }

    async fn write(
        &self,
        room: &RoomId,
        document: &Document,
        meta: WriteMeta,
    ) -> Result<(), ChannelError> {
        let delay = self
            .inner
            .lock()
            .map_err(|_| ChannelError::Disconnected)?
            .write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().map_err(|_| ChannelError::Disconnected)?;
        if inner.offline {
            return Err(ChannelError::Offline);
        }
        inner.writes += 1;
        let envelope = Envelope::new(document.clone(), meta.client_id, meta.updated_at_ms);
        let hub_room = inner.rooms.entry(room.clone()).or_default();
        hub_room.latest = Some(envelope.clone());
        notify(hub_room, RemoteSignal::Envelope(envelope));
        Ok(())
    }
}
