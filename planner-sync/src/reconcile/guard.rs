//! Echo guard: decides when remote envelopes may be applied and when the
//! local document may be written back.
//!
//! ```text
//!               LocalEdit                      RemoteApplied
//!   ┌──────────────┐ ◄──────── ┌──────┐ ────────► ┌────────────────┐
//!   │ LocalPending │           │ Idle │           │ ApplyingRemote │
//!   └──────────────┘ ────────► └──────┘ ◄──────── └────────────────┘
//!               WriteSettled                   Release (next tick)
//! ```
//!
//! `LocalPending` defers foreign envelopes until the local write settles.
//! `ApplyingRemote` suppresses write-back until the release tick, so an
//! applied snapshot is never echoed back as a fresh write.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    LocalPending,
    ApplyingRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardEvent {
    /// A document edit was applied locally
    LocalEdit,
    /// A foreign envelope was merged
    RemoteApplied,
    /// The write carrying the latest edit finished (either way)
    WriteSettled,
    /// Scheduling tick after a remote apply
    Release,
}

/// Next state for `event` in `from`.
pub const fn transition(from: GuardState, event: GuardEvent) -> GuardState {
    use GuardEvent::*;
    use GuardState::*;
    match (from, event) {
        (_, LocalEdit) => LocalPending,
        (Idle, RemoteApplied) => ApplyingRemote,
        (Idle, WriteSettled) | (Idle, Release) => Idle,
        (LocalPending, RemoteApplied) | (LocalPending, Release) => LocalPending,
        (LocalPending, WriteSettled) => Idle,
        (ApplyingRemote, RemoteApplied) | (ApplyingRemote, WriteSettled) => ApplyingRemote,
        (ApplyingRemote, Release) => Idle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoGuard {
    state: GuardState,
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoGuard {
    pub fn new() -> Self {
        Self {
            state: GuardState::Idle,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn on(&mut self, event: GuardEvent) -> GuardState {
        let next = transition(self.state, event);
        if next != self.state {
            log::trace!("Echo guard {:?} --{event:?}--> {next:?}", self.state);
        }
        self.state = next;
        next
    }

    /// Foreign envelopes must wait.
    pub fn defers_remote(&self) -> bool {
        self.state == GuardState::LocalPending
    }

    /// Write-back must not run.
    pub fn suppresses_flush(&self) -> bool {
        self.state == GuardState::ApplyingRemote
    }

    pub fn awaiting_release(&self) -> bool {
        self.state == GuardState::ApplyingRemote
    }
}
