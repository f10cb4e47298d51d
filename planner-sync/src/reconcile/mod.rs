//! Client-side reconciliation of local edits with the remote document.
//!
//! ```text
//!  local edit ──► Reconciler ──► WriteBackScheduler ──► WriteRequest
//!                    ▲  │
//!  RemoteSignal ─────┘  └──► EchoGuard (LocalPending / ApplyingRemote)
//! ```

pub mod core;
pub mod guard;
pub mod scheduler;

pub use self::core::{
    EditOutcome, FlushReason, Patch, Reconciler, ReconcilerStats, RemoteOutcome, WriteRequest,
    WriteTicket,
};
pub use guard::{EchoGuard, GuardEvent, GuardState};
pub use scheduler::{sleep_until_deadline, WriteBackScheduler, DEFAULT_DEBOUNCE};
