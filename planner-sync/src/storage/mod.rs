//! Persistent storage for room documents on the sync server.
//!
//! ```text
//! ┌─────────────┐  envelope bytes  ┌──────────────┐
//! │ SyncServer  │ ───────────────► │ RoomStore    │
//! │ (in-memory) │                  │ (RocksDB)    │
//! └──────┬──────┘                  └──────┬───────┘
//!        │ on startup                     │ column families
//!        ▼                                ▼
//!  recovered rooms           CF "rooms"    — latest envelope (LZ4)
//!                            CF "metadata" — writer, sizes, counts
//! ```

pub mod rocks;

pub use rocks::{RoomMetadata, RoomStore, StoreConfig, StoreError, WriteStamp};
