//! # planner-sync — Shared-room synchronization for the planner
//!
//! Keeps each device's copy of the planning document converged with the
//! room's latest envelope using whole-document last-writer-wins.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   edits    ┌─────────────┐   WriteRequest   ┌──────────────┐
//! │ SessionHandle│ ─────────► │ SyncSession │ ───────────────► │RemoteChannel │
//! │ (UI surface) │ ◄───────── │ (Reconciler)│ ◄─────────────── │ SyncClient / │
//! └──────────────┘   watch    └──────┬──────┘   RemoteSignal   │ MemoryHub    │
//!                                    │                         └──────┬───────┘
//!                                    ▼                                │ WebSocket
//!                             ┌─────────────┐                  ┌──────┴───────┐
//!                             │ LocalStore  │                  │ SyncServer   │
//!                             │ (device)    │                  │ RoomStore    │
//!                             └─────────────┘                  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Envelope JSON and the binary frame protocol
//! - [`reconcile`] — Reconciler, echo guard and debounced write-back
//! - [`session`] — Task that drives a reconciler against a channel
//! - [`channel`] — Remote channel trait and the in-process hub
//! - [`client`] — WebSocket channel implementation
//! - [`server`] — WebSocket sync server
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`storage`] — Persistent room envelopes (RocksDB)
//! - [`local`] — Device-local state and client id
//! - [`blob`] — PDF attachment uploads

pub mod blob;
pub mod broadcast;
pub mod channel;
pub mod client;
pub mod local;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use blob::{attach_pdf, BlobError, BlobStore, FsBlobStore, UnavailableBlobStore, UploadedBlob};
pub use broadcast::{BroadcastGroup, BroadcastStats, RoomManager};
pub use channel::{ChannelError, MemoryHub, RemoteChannel, RemoteSignal, Subscription, WriteMeta};
pub use client::{ClientConfig, ConnectionState, SyncClient};
pub use local::{resolve_client_id, FileStore, LocalStore, LocalStoreError, MemoryStore};
pub use protocol::{
    ClientId, Envelope, EnvelopeMeta, MessageType, ProtocolError, RoomId, SyncMessage,
};
pub use reconcile::{
    EditOutcome, FlushReason, GuardState, Patch, Reconciler, ReconcilerStats, RemoteOutcome,
    WriteRequest,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{SessionConfig, SessionError, SessionHandle, SyncSession};
pub use storage::{RoomMetadata, RoomStore, StoreConfig, StoreError};
