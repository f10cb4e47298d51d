//! A running sync session: one reconciler driven by one task.
//!
//! The task owns the [`Reconciler`] and multiplexes edit commands, remote
//! signals, the debounce deadline and write completions. Everything the
//! reconciler decides happens on this task, so there is no locking around
//! the state itself; readers get snapshots through a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use planner_core::model::AppState;

use crate::channel::{ChannelError, RemoteChannel, RemoteSignal, Subscription};
use crate::local::LocalStore;
use crate::protocol::{now_ms, ClientId, RoomId};
use crate::reconcile::{
    sleep_until_deadline, EditOutcome, FlushReason, GuardState, Patch, Reconciler, ReconcilerStats,
    RemoteOutcome, WriteBackScheduler, WriteRequest, WriteTicket, DEFAULT_DEBOUNCE,
};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room: RoomId,
    /// Quiet period before a local edit is written back
    pub debounce: Duration,
    /// How long teardown waits for in-flight writes
    pub teardown_grace: Duration,
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room: RoomId::default(),
            debounce: DEFAULT_DEBOUNCE,
            teardown_grace: Duration::from_secs(2),
            command_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn for_room(room: RoomId) -> Self {
        Self {
            room,
            ..Self::default()
        }
    }

    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            teardown_grace: Duration::from_millis(500),
            ..Self::default()
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The session task has stopped
    Closed,
    Channel(ChannelError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Session closed"),
            Self::Channel(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        SessionError::Channel(e)
    }
}

enum SessionCommand {
    Edit(Patch, oneshot::Sender<EditOutcome>),
    Flush(FlushReason),
    Shutdown(oneshot::Sender<ReconcilerStats>),
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<AppState>,
    joined: watch::Receiver<bool>,
    client_id: ClientId,
    room: RoomId,
}

impl SessionHandle {
    /// Apply a local edit and report what it changed.
    pub async fn edit(&self, patch: impl Into<Patch>) -> Result<EditOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Edit(patch.into(), tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Write back now instead of waiting for the debounce (page hidden,
    /// unload and similar).
    pub async fn flush(&self, reason: FlushReason) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Flush(reason))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Latest published state.
    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    /// Receiver that changes on every published state.
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.state.clone()
    }

    /// Resolves once the room's first signal (snapshot or "missing") has
    /// been handled, so the state no longer reflects only this device.
    pub async fn joined(&self) -> Result<(), SessionError> {
        let mut joined = self.joined.clone();
        joined
            .wait_for(|joined| *joined)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Closed)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Tear the session down: cancel the debounce, flush, wait for
    /// in-flight writes within the grace period and unsubscribe.
    pub async fn shutdown(&self) -> Result<ReconcilerStats, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Shutdown(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Spawns sync sessions.
pub struct SyncSession;

impl SyncSession {
    /// Subscribe to the configured room and start the session task.
    ///
    /// The initial state comes from `store`; the remote snapshot (or the
    /// room's absence) arrives as the first signal.
    pub async fn spawn<C, S>(
        channel: Arc<C>,
        store: S,
        client_id: ClientId,
        config: SessionConfig,
    ) -> Result<(SessionHandle, JoinHandle<()>), SessionError>
    where
        C: RemoteChannel,
        S: LocalStore,
    {
        let reconciler = Reconciler::new(store, client_id.clone());
        let subscription = channel.subscribe(&config.room).await?;
        log::info!(
            "Session {} subscribed to room {}",
            client_id,
            config.room
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (state_tx, state_rx) = watch::channel(reconciler.state().clone());
        let (joined_tx, joined_rx) = watch::channel(false);

        let handle = SessionHandle {
            commands: cmd_tx,
            state: state_rx,
            joined: joined_rx,
            client_id,
            room: config.room.clone(),
        };

        let task = SessionTask {
            scheduler: WriteBackScheduler::new(config.debounce),
            config,
            channel,
            reconciler,
            subscription,
            subscription_open: true,
            writes: JoinSet::new(),
            state_tx,
            joined_tx,
        };
        let join = tokio::spawn(task.run(cmd_rx));
        Ok((handle, join))
    }
}

struct SessionTask<C: RemoteChannel, S: LocalStore> {
    config: SessionConfig,
    channel: Arc<C>,
    reconciler: Reconciler<S>,
    subscription: Subscription,
    subscription_open: bool,
    scheduler: WriteBackScheduler,
    writes: JoinSet<(WriteTicket, Result<(), ChannelError>)>,
    state_tx: watch::Sender<AppState>,
    joined_tx: watch::Sender<bool>,
}

impl<C: RemoteChannel, S: LocalStore> SessionTask<C, S> {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            let releasing = self.reconciler.guard_state() == GuardState::ApplyingRemote;

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Edit(patch, reply)) => {
                        let outcome = self.reconciler.apply_local_edit(patch);
                        match outcome {
                            EditOutcome::DocumentChanged => {
                                self.scheduler.arm();
                                self.publish();
                            }
                            EditOutcome::UiOnly => self.publish(),
                            EditOutcome::Unchanged => {}
                        }
                        let _ = reply.send(outcome);
                    }
                    Some(SessionCommand::Flush(reason)) => {
                        self.scheduler.cancel();
                        self.flush(reason);
                    }
                    Some(SessionCommand::Shutdown(reply)) => {
                        let stats = self.teardown().await;
                        let _ = reply.send(stats);
                        return;
                    }
                    None => {
                        // every handle dropped
                        self.teardown().await;
                        return;
                    }
                },

                signal = self.subscription.recv(), if self.subscription_open => match signal {
                    Some(signal) => self.on_remote(signal),
                    None => {
                        log::warn!("Remote feed for room {} closed", self.config.room);
                        self.subscription_open = false;
                    }
                },

                _ = sleep_until_deadline(self.scheduler.deadline()), if self.scheduler.is_armed() => {
                    self.scheduler.cancel();
                    self.flush(FlushReason::Debounce);
                }

                Some(done) = self.writes.join_next(), if !self.writes.is_empty() => {
                    self.on_write_done(done);
                }

                _ = tokio::task::yield_now(), if releasing => {
                    self.reconciler.release_guard();
                }
            }
        }
    }

    fn on_remote(&mut self, signal: RemoteSignal) {
        match self.reconciler.on_remote(signal, now_ms()) {
            RemoteOutcome::Merged => self.publish(),
            RemoteOutcome::Seed(request) => self.start_write(request),
            RemoteOutcome::Stale
            | RemoteOutcome::SelfEcho
            | RemoteOutcome::Deferred
            | RemoteOutcome::Ignored => {}
        }
        self.joined_tx.send_if_modified(|joined| !std::mem::replace(joined, true));
    }

    fn flush(&mut self, reason: FlushReason) {
        if let Some(request) = self.reconciler.flush(reason, now_ms()) {
            self.start_write(request);
        }
    }

    fn start_write(&mut self, request: WriteRequest) {
        let channel = Arc::clone(&self.channel);
        let room = self.config.room.clone();
        let WriteRequest {
            document,
            meta,
            ticket,
        } = request;
        log::debug!("Writing room {room} at {}", ticket.updated_at_ms);
        self.writes.spawn(async move {
            let result = channel.write(&room, &document, meta).await;
            (ticket, result)
        });
    }

    fn on_write_done(
        &mut self,
        done: Result<(WriteTicket, Result<(), ChannelError>), tokio::task::JoinError>,
    ) {
        match done {
            Ok((ticket, result)) => {
                if self.reconciler.write_settled(ticket, result) {
                    self.publish();
                }
            }
            Err(e) => log::error!("Write task failed: {e}"),
        }
    }

    async fn teardown(&mut self) -> ReconcilerStats {
        self.scheduler.cancel();
        // a remote apply in progress has nothing left to settle
        self.reconciler.release_guard();
        self.flush(FlushReason::Teardown);

        let grace = self.config.teardown_grace;
        let drain = async {
            while let Some(done) = self.writes.join_next().await {
                self.on_write_done(done);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            log::warn!(
                "{} write(s) still in flight after {:?}; abandoning",
                self.writes.len(),
                grace
            );
            self.writes.abort_all();
        }

        self.subscription.unsubscribe();
        self.publish();
        log::info!(
            "Session {} left room {}",
            self.reconciler.client_id(),
            self.config.room
        );
        self.reconciler.stats().clone()
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.reconciler.state().clone());
    }
}
