//! One tab: reconciler, optimistic log, and derived view behind an actor.
//!
//! The tab actor consumes its agent port and its own command queue in arrival
//! order. Writes run as spawned tasks that report back through the same
//! queue, so the log and the reconciler are only ever touched from the actor.
//!
//! # Write patterns
//!
//! | Method                       | Before the request | After it settles         |
//! |------------------------------|--------------------|--------------------------|
//! | `add_*`, `update_*`, `delete_*` | nothing         | confirmed entry @change  |
//! | `update_*_optimistic`        | pending entry      | pending removed, confirmed entry @change |
//!
//! A pending entry is removed when its request settles, success or not. A
//! [`SettleGuard`] reports the settlement even if the write task dies first.

use std::sync::Arc;

use chrono::Utc;
use huntsync_types::{
    AgentMessage, ChangeId, ConnectionState, Entity, NewPuzzle, NewRound, Presence, PuzzleId,
    PuzzlePatch, RoundId, RoundPatch, Settings, SyncEvent, TabId, TabMessage, Users,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentError, AgentHandle, Port};
use crate::api::{ApiError, HuntApi, WriteRequest, WriteResponse};
use crate::constants::TAB_EVENT_CAPACITY;
use crate::locks::{LockError, LockGuard, LockManager};
use crate::optimistic::{OptimisticEntry, OptimisticLog, WriteKey};
use crate::reconciler::{Applied, Reconciler};
use crate::view::PuzzleView;

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TabError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("write task ended before its request settled")]
    Aborted,
    #[error("tab closed")]
    Closed,
}

/// Why the tab's state can't be trusted any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The agent's stream became unrecoverable.
    Dead,
    /// An event skipped past the next expected change id.
    Drift { expected: ChangeId, got: ChangeId },
    /// The write API rejected the session.
    Unauthorized,
}

/// Notifications for whoever drives the tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Connection(ConnectionState),
    /// Start over from a fresh snapshot. Sent at most once per tab.
    Reload(ReloadReason),
    Settings(Settings),
    Presence(Presence),
    Users(Users),
}

/// Sizes of the optimistic log, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub watermark: ChangeId,
    pub pending: usize,
    pub confirmed: usize,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum TabCommand {
    Write {
        request: WriteRequest,
        optimistic: bool,
        reply: oneshot::Sender<Result<ChangeId, TabError>>,
    },
    Settled {
        settle: Settle,
        outcome: Result<WriteResponse, TabError>,
    },
    Activity {
        subject: PuzzleId,
        active: bool,
    },
    Stats {
        reply: oneshot::Sender<WriteStats>,
    },
    Close,
}

struct Settle {
    pending: Option<WriteKey>,
    request: WriteRequest,
    reply: oneshot::Sender<Result<ChangeId, TabError>>,
}

/// Posts a write's settlement exactly once: explicitly via `finish`, or on
/// drop if the task never got that far.
struct SettleGuard {
    inbox: mpsc::WeakUnboundedSender<TabCommand>,
    settle: Option<Settle>,
}

impl SettleGuard {
    fn finish(mut self, outcome: Result<WriteResponse, ApiError>) {
        if let Some(settle) = self.settle.take() {
            self.post(settle, outcome.map_err(TabError::from));
        }
    }

    fn post(&self, settle: Settle, outcome: Result<WriteResponse, TabError>) {
        if let Some(tx) = self.inbox.upgrade() {
            let _ = tx.send(TabCommand::Settled { settle, outcome });
        }
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            self.post(settle, Err(TabError::Aborted));
        }
    }
}

// ============================================================================
// TabHandle (public API)
// ============================================================================

#[derive(Clone)]
pub struct TabHandle {
    id: TabId,
    tx: mpsc::UnboundedSender<TabCommand>,
    view: watch::Receiver<Arc<PuzzleView>>,
    connection: watch::Receiver<ConnectionState>,
    settings: watch::Receiver<Settings>,
    events: broadcast::Sender<TabEvent>,
}

impl TabHandle {
    /// Attach a new tab to `agent`.
    ///
    /// Takes the tab's liveness lock, registers with the agent, then loads the
    /// snapshot. Agent messages that arrive meanwhile are queued and applied
    /// on top of the snapshot. The returned receiver sees every event from
    /// the start, including an immediate reload if the agent is already dead.
    pub async fn open(
        agent: &AgentHandle,
        api: Arc<dyn HuntApi>,
        locks: &LockManager,
        scope: Option<PuzzleId>,
    ) -> Result<(TabHandle, broadcast::Receiver<TabEvent>), TabError> {
        let id = TabId::new();
        let lock = locks.hold(&id.to_string())?;
        let mut port = agent.connect();
        port.send(TabMessage::Start { id, scope })?;

        let snapshot = api.home().await?;
        info!(
            tab = %id.short(),
            watermark = %snapshot.change_id,
            puzzles = snapshot.puzzles.len(),
            rounds = snapshot.rounds.len(),
            "snapshot loaded"
        );
        let reconciler = Reconciler::from_snapshot(snapshot);

        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(Arc::new(PuzzleView::default()));
        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);
        let (settings_tx, settings) = watch::channel(reconciler.settings().clone());
        let (events, first_rx) = broadcast::channel(TAB_EVENT_CAPACITY);

        let actor = TabActor {
            id,
            reconciler,
            log: OptimisticLog::new(),
            port,
            api,
            inbox: tx.downgrade(),
            view_tx,
            connection_tx,
            settings_tx,
            events: events.clone(),
            reloaded: false,
            dirty: true,
            _lock: lock,
        };
        tokio::spawn(actor.run(rx));

        let handle = TabHandle { id, tx, view, connection, settings, events };
        Ok((handle, first_rx))
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    /// Latest derived view; `changed()` fires on every recomputation.
    pub fn view(&self) -> watch::Receiver<Arc<PuzzleView>> {
        self.view.clone()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn settings(&self) -> watch::Receiver<Settings> {
        self.settings.clone()
    }

    /// Events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }

    pub fn report_activity(&self, subject: PuzzleId, active: bool) -> Result<(), TabError> {
        self.tx
            .send(TabCommand::Activity { subject, active })
            .map_err(|_| TabError::Closed)
    }

    pub async fn stats(&self) -> Result<WriteStats, TabError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(TabCommand::Stats { reply }).map_err(|_| TabError::Closed)?;
        rx.await.map_err(|_| TabError::Closed)
    }

    /// Stop the actor. Releases the liveness lock, so the agent evicts the tab.
    pub fn close(&self) {
        let _ = self.tx.send(TabCommand::Close);
    }

    // ── Writes ───────────────────────────────────────────────────────────

    pub async fn add_puzzle(&self, puzzle: NewPuzzle) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::CreatePuzzle(puzzle), false).await
    }

    pub async fn update_puzzle(&self, id: PuzzleId, patch: PuzzlePatch) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::UpdatePuzzle { id, patch }, false).await
    }

    /// Like [`update_puzzle`](Self::update_puzzle), but visible before the server answers.
    pub async fn update_puzzle_optimistic(&self, id: PuzzleId, patch: PuzzlePatch) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::UpdatePuzzle { id, patch }, true).await
    }

    pub async fn delete_puzzle(&self, id: PuzzleId) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::DeletePuzzle { id }, false).await
    }

    pub async fn add_round(&self, round: NewRound) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::CreateRound(round), false).await
    }

    pub async fn update_round(&self, id: RoundId, patch: RoundPatch) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::UpdateRound { id, patch }, false).await
    }

    pub async fn update_round_optimistic(&self, id: RoundId, patch: RoundPatch) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::UpdateRound { id, patch }, true).await
    }

    pub async fn delete_round(&self, id: RoundId) -> Result<ChangeId, TabError> {
        self.write(WriteRequest::DeleteRound { id }, false).await
    }

    async fn write(&self, request: WriteRequest, optimistic: bool) -> Result<ChangeId, TabError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TabCommand::Write { request, optimistic, reply })
            .map_err(|_| TabError::Closed)?;
        rx.await.map_err(|_| TabError::Closed)?
    }
}

// ============================================================================
// TabActor (internal)
// ============================================================================

struct TabActor {
    id: TabId,
    reconciler: Reconciler,
    log: OptimisticLog,
    port: Port,
    api: Arc<dyn HuntApi>,
    inbox: mpsc::WeakUnboundedSender<TabCommand>,
    view_tx: watch::Sender<Arc<PuzzleView>>,
    connection_tx: watch::Sender<ConnectionState>,
    settings_tx: watch::Sender<Settings>,
    events: broadcast::Sender<TabEvent>,
    reloaded: bool,
    /// The view needs recomputing.
    dirty: bool,
    _lock: LockGuard,
}

impl TabActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<TabCommand>) {
        let mut port_open = true;
        loop {
            if self.dirty {
                self.refresh();
            }
            tokio::select! {
                msg = self.port.recv(), if port_open => match msg {
                    Some(msg) => {
                        self.on_agent_message(msg);
                        // Apply whatever else is already queued before recomputing.
                        while let Ok(msg) = self.port.try_recv() {
                            self.on_agent_message(msg);
                        }
                    }
                    None => {
                        warn!(tab = %self.id.short(), "agent channel closed");
                        port_open = false;
                        self.set_connection(ConnectionState::Disconnected);
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(TabCommand::Close) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
            }
        }
        info!(tab = %self.id.short(), pending = self.log.pending_count(), "tab closed");
    }

    fn refresh(&mut self) {
        let (puzzles, rounds) = self.reconciler.materialize(&self.log);
        let view = PuzzleView::derive(&puzzles, &rounds, Utc::now());
        self.view_tx.send_replace(Arc::new(view));
        self.dirty = false;
    }

    fn emit(&self, event: TabEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn reload(&mut self, reason: ReloadReason) {
        if self.reloaded {
            return;
        }
        self.reloaded = true;
        error!(tab = %self.id.short(), ?reason, "tab state unrecoverable, reload required");
        self.emit(TabEvent::Reload(reason));
    }

    fn set_connection(&mut self, state: ConnectionState) {
        self.connection_tx.send_replace(state);
        self.emit(TabEvent::Connection(state));
        if state == ConnectionState::Dead {
            self.reload(ReloadReason::Dead);
        }
    }

    // ── Agent messages ───────────────────────────────────────────────────

    fn on_agent_message(&mut self, msg: AgentMessage) {
        match msg {
            AgentMessage::Sync(event) => self.on_sync(&event),
            AgentMessage::Status(state) => self.set_connection(state),
            AgentMessage::Settings(settings) => {
                self.reconciler.set_settings(settings.clone());
                self.settings_tx.send_replace(settings.clone());
                self.emit(TabEvent::Settings(settings));
            }
            AgentMessage::Presence(presence) => self.emit(TabEvent::Presence(presence)),
            AgentMessage::Users(users) => self.emit(TabEvent::Users(users)),
        }
    }

    fn on_sync(&mut self, event: &SyncEvent) {
        // Our own confirmed write has come back; the authoritative copy wins.
        if self.log.remove(WriteKey::from(event.change_id)).is_some() {
            self.dirty = true;
        }
        match self.reconciler.apply(event) {
            Applied::Changed => {
                let pruned = self.log.prune_through(self.reconciler.watermark());
                if pruned > 0 {
                    debug!(tab = %self.id.short(), pruned, "pruned confirmed writes");
                }
                self.dirty = true;
            }
            Applied::Stale => {}
            Applied::Drift { expected, got } => self.reload(ReloadReason::Drift { expected, got }),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    fn on_command(&mut self, cmd: TabCommand) {
        match cmd {
            TabCommand::Write { request, optimistic, reply } => self.start_write(request, optimistic, reply),
            TabCommand::Settled { settle, outcome } => self.on_settled(settle, outcome),
            TabCommand::Activity { subject, active } => {
                if let Err(e) = self.port.send(TabMessage::Activity { id: self.id, subject, active }) {
                    warn!(tab = %self.id.short(), error = %e, "activity not delivered");
                }
            }
            TabCommand::Stats { reply } => {
                let _ = reply.send(WriteStats {
                    watermark: self.reconciler.watermark(),
                    pending: self.log.pending_count(),
                    confirmed: self.log.confirmed_count(),
                });
            }
            TabCommand::Close => {}
        }
    }

    fn start_write(
        &mut self,
        request: WriteRequest,
        optimistic: bool,
        reply: oneshot::Sender<Result<ChangeId, TabError>>,
    ) {
        let pending = match optimistic.then(|| entry_for(&request)).flatten() {
            Some(entry) => {
                self.dirty = true;
                Some(self.log.insert_pending(entry))
            }
            None => None,
        };

        let guard = SettleGuard {
            inbox: self.inbox.clone(),
            settle: Some(Settle { pending, request: request.clone(), reply }),
        };
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let outcome = api.write(request).await;
            guard.finish(outcome);
        });
    }

    fn on_settled(&mut self, settle: Settle, outcome: Result<WriteResponse, TabError>) {
        let Settle { pending, request, reply } = settle;
        if let Some(key) = pending {
            self.log.remove(key);
            self.dirty = true;
        }

        let result = match outcome {
            Ok(response) => {
                let change_id = response.change_id;
                if let Some(entry) = confirmed_entry(&request, response) {
                    if self.log.confirm(change_id, entry, self.reconciler.watermark()) {
                        self.dirty = true;
                    }
                }
                debug!(tab = %self.id.short(), %change_id, path = %request.path(), "write confirmed");
                Ok(change_id)
            }
            Err(e) => {
                if matches!(e, TabError::Api(ApiError::Unauthorized)) {
                    self.reload(ReloadReason::Unauthorized);
                } else {
                    warn!(tab = %self.id.short(), path = %request.path(), error = %e, "write failed");
                }
                Err(e)
            }
        };
        let _ = reply.send(result);
    }
}

/// The optimistic form of a request, when it can be known before the server
/// answers. Creates can't: the id comes from the server.
fn entry_for(request: &WriteRequest) -> Option<OptimisticEntry> {
    match request {
        WriteRequest::UpdatePuzzle { id, patch } => Some(OptimisticEntry::Puzzle { id: *id, patch: patch.clone() }),
        WriteRequest::DeletePuzzle { id } => Some(OptimisticEntry::DeletePuzzle(*id)),
        WriteRequest::UpdateRound { id, patch } => Some(OptimisticEntry::Round { id: *id, patch: patch.clone() }),
        WriteRequest::DeleteRound { id } => Some(OptimisticEntry::DeleteRound(*id)),
        WriteRequest::CreatePuzzle(_) | WriteRequest::CreateRound(_) => None,
    }
}

fn confirmed_entry(request: &WriteRequest, response: WriteResponse) -> Option<OptimisticEntry> {
    match (request, response.entity) {
        (WriteRequest::CreatePuzzle(_), Some(Entity::Puzzle(p))) => {
            Some(OptimisticEntry::Puzzle { id: p.id, patch: p.into() })
        }
        (WriteRequest::CreateRound(_), Some(Entity::Round(r))) => {
            Some(OptimisticEntry::Round { id: r.id, patch: r.into() })
        }
        (WriteRequest::CreatePuzzle(_) | WriteRequest::CreateRound(_), _) => None,
        _ => entry_for(request),
    }
}
