//! The shared connection agent.
//!
//! One agent serves every tab of an origin. It owns the only upstream
//! connection, the rewind buffer, and the port registry, and processes
//! everything (tab messages, upstream frames, timers, liveness signals) from
//! a single queue, one input at a time.
//!
//! ```text
//!   Port (tab) ──┐                                   ┌── Upstream link task
//!   Port (tab) ──┼── AgentInput ──▶ ┌───────────┐ ◀──┤   (per attempt)
//!   AgentHandle ─┘   (one queue)    │   Agent   │    ├── retry timer
//!                                   └───────────┘ ◀──┴── liveness watchers
//!                                     │ fanout
//!                                     ▼
//!                              AgentMessage per port
//! ```
//!
//! Helper tasks only hold weak senders, so the agent stops once every
//! [`AgentHandle`] and [`Port`] is gone (or on [`AgentHandle::shutdown`]).

use std::sync::Arc;

use huntsync_types::{
    AgentMessage, ConnectionState, LiveMessage, Settings, TabId, TabMessage,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::connection::{AttemptId, ConnectionMachine, Failure, Retry};
use crate::locks::LockManager;
use crate::ports::{ActivityTable, PortRegistry};
use crate::rewind::RewindBuffer;
use crate::upstream::{Upstream, UpstreamFrame, UpstreamRequest};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent shut down")]
    Shutdown,
}

// ============================================================================
// Inputs (internal)
// ============================================================================

enum AgentInput {
    /// A tab spoke. `reply_to` accompanies `Start` so the agent can answer.
    FromTab {
        msg: TabMessage,
        reply_to: Option<mpsc::UnboundedSender<AgentMessage>>,
    },
    /// The tab's liveness lock became acquirable.
    TabGone(TabId),
    Link { attempt: AttemptId, event: LinkEvent },
    RetryDue,
    Status { reply: oneshot::Sender<ConnectionState> },
    Tabs { reply: oneshot::Sender<Vec<TabId>> },
    Shutdown,
}

enum LinkEvent {
    Opened(mpsc::UnboundedSender<UpstreamRequest>),
    Frame(LiveMessage),
    Ended(Failure),
}

type Inbox = mpsc::WeakUnboundedSender<AgentInput>;

fn post(inbox: &Inbox, input: AgentInput) -> bool {
    inbox.upgrade().is_some_and(|tx| tx.send(input).is_ok())
}

// ============================================================================
// AgentHandle / Port (public API)
// ============================================================================

/// Handle to a running agent. Cheap to clone.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentInput>,
}

impl AgentHandle {
    /// Open a new message channel to the agent, as a tab would.
    pub fn connect(&self) -> Port {
        let (reply_to, inbox) = mpsc::unbounded_channel();
        Port {
            agent: self.tx.clone(),
            weak_reply: reply_to.downgrade(),
            reply_to: Some(reply_to),
            inbox,
        }
    }

    pub async fn status(&self) -> Result<ConnectionState, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentInput::Status { reply }).map_err(|_| AgentError::Shutdown)?;
        rx.await.map_err(|_| AgentError::Shutdown)
    }

    /// Registered tabs.
    pub async fn tabs(&self) -> Result<Vec<TabId>, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentInput::Tabs { reply }).map_err(|_| AgentError::Shutdown)?;
        rx.await.map_err(|_| AgentError::Shutdown)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(AgentInput::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One tab's channel to the agent.
///
/// The agent holds the only strong sender for this port's inbox once `Start`
/// has been sent, so [`Port::recv`] returns `None` after the tab is evicted or
/// the agent stops.
pub struct Port {
    agent: mpsc::UnboundedSender<AgentInput>,
    reply_to: Option<mpsc::UnboundedSender<AgentMessage>>,
    weak_reply: mpsc::WeakUnboundedSender<AgentMessage>,
    inbox: mpsc::UnboundedReceiver<AgentMessage>,
}

impl Port {
    pub fn send(&mut self, msg: TabMessage) -> Result<(), AgentError> {
        let reply_to = match msg {
            TabMessage::Start { .. } => self.reply_to.take().or_else(|| self.weak_reply.upgrade()),
            TabMessage::Activity { .. } => None,
        };
        self.agent
            .send(AgentInput::FromTab { msg, reply_to })
            .map_err(|_| AgentError::Shutdown)
    }

    pub async fn recv(&mut self) -> Option<AgentMessage> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Result<AgentMessage, mpsc::error::TryRecvError> {
        self.inbox.try_recv()
    }
}

// ============================================================================
// Agent (internal)
// ============================================================================

struct ActiveLink {
    attempt: AttemptId,
    requests: Option<mpsc::UnboundedSender<UpstreamRequest>>,
    task: JoinHandle<()>,
}

struct Agent {
    config: AgentConfig,
    upstream: Arc<dyn Upstream>,
    locks: LockManager,
    inbox: Inbox,
    machine: ConnectionMachine,
    /// Last state broadcast to tabs.
    published: ConnectionState,
    rewind: RewindBuffer,
    ports: PortRegistry,
    activity: ActivityTable,
    settings: Option<Settings>,
    link: Option<ActiveLink>,
    retry: Option<JoinHandle<()>>,
}

impl Agent {
    fn new(config: AgentConfig, upstream: Arc<dyn Upstream>, locks: LockManager, inbox: Inbox) -> Self {
        Self {
            machine: ConnectionMachine::new(config.backoff()),
            rewind: RewindBuffer::with_capacity(config.rewind_capacity),
            published: ConnectionState::Disconnected,
            ports: PortRegistry::new(),
            activity: ActivityTable::new(),
            settings: None,
            link: None,
            retry: None,
            config,
            upstream,
            locks,
            inbox,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgentInput>) {
        self.start_attempt();

        let mut flush = tokio::time::interval(self.config.activity_flush_interval());
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush.tick().await;

        loop {
            tokio::select! {
                input = rx.recv() => match input {
                    Some(AgentInput::Shutdown) | None => break,
                    Some(input) => self.handle(input),
                },
                _ = flush.tick() => self.flush_activity(false),
            }
        }

        info!(tabs = self.ports.len(), "agent shutting down");
        self.drop_link();
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }

    fn handle(&mut self, input: AgentInput) {
        match input {
            AgentInput::FromTab { msg, reply_to } => self.on_tab_message(msg, reply_to),
            AgentInput::TabGone(id) => self.on_tab_gone(id),
            AgentInput::Link { attempt, event } => self.on_link_event(attempt, event),
            AgentInput::RetryDue => {
                self.retry = None;
                if self.link.is_none() {
                    self.start_attempt();
                }
            }
            AgentInput::Status { reply } => {
                let _ = reply.send(self.machine.state());
            }
            AgentInput::Tabs { reply } => {
                let _ = reply.send(self.ports.ids());
            }
            AgentInput::Shutdown => {}
        }
    }

    // ── Tabs ─────────────────────────────────────────────────────────────

    fn on_tab_message(&mut self, msg: TabMessage, reply_to: Option<mpsc::UnboundedSender<AgentMessage>>) {
        match msg {
            TabMessage::Start { id, scope } => {
                let Some(tx) = reply_to else {
                    warn!(tab = %id.short(), "start from a port that is no longer reachable");
                    return;
                };
                let is_new = self.ports.register(id, scope, tx);
                info!(tab = %id.short(), ?scope, tabs = self.ports.len(), "tab attached");

                self.ports.unicast(id, AgentMessage::Status(self.machine.state()));
                if let Some(settings) = &self.settings {
                    self.ports.unicast(id, AgentMessage::Settings(settings.clone()));
                }
                for event in self.rewind.iter() {
                    self.ports.unicast(id, AgentMessage::Sync(event.clone()));
                }
                debug!(tab = %id.short(), replayed = self.rewind.len(), "rewind replayed");

                if is_new {
                    self.watch_liveness(id);
                }
            }
            TabMessage::Activity { id, subject, active } => {
                if !self.ports.contains(id) {
                    debug!(tab = %id.short(), "activity from unregistered tab");
                    return;
                }
                self.activity.report(id, subject, active);
            }
        }
    }

    fn watch_liveness(&self, id: TabId) {
        let released = self.locks.released(&id.to_string());
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            released.await;
            post(&inbox, AgentInput::TabGone(id));
        });
    }

    fn on_tab_gone(&mut self, id: TabId) {
        if self.ports.deregister(id) {
            self.activity.remove(id);
            info!(tab = %id.short(), tabs = self.ports.len(), "tab gone");
        }
    }

    // ── Upstream ─────────────────────────────────────────────────────────

    fn start_attempt(&mut self) {
        self.drop_link();
        let Some(attempt) = self.machine.begin_attempt() else {
            return;
        };
        let after = self.rewind.last_change_id();
        debug!(%attempt, ?after, "starting upstream attempt");

        let upstream = Arc::clone(&self.upstream);
        let timeout = self.config.connect_timeout();
        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            let link = match tokio::time::timeout(timeout, upstream.connect(after)).await {
                Err(_) => {
                    post(&inbox, AgentInput::Link { attempt, event: LinkEvent::Ended(Failure::TimedOut) });
                    return;
                }
                Ok(Err(e)) => {
                    let failure = Failure::Error(e.to_string());
                    post(&inbox, AgentInput::Link { attempt, event: LinkEvent::Ended(failure) });
                    return;
                }
                Ok(Ok(link)) => link,
            };

            let mut frames = link.frames;
            if !post(&inbox, AgentInput::Link { attempt, event: LinkEvent::Opened(link.requests) }) {
                return;
            }
            let failure = loop {
                match frames.recv().await {
                    Some(UpstreamFrame::Message(msg)) => {
                        if !post(&inbox, AgentInput::Link { attempt, event: LinkEvent::Frame(msg) }) {
                            return;
                        }
                    }
                    Some(UpstreamFrame::Closed(failure)) => break failure,
                    None => break Failure::Error("upstream link dropped".into()),
                }
            };
            post(&inbox, AgentInput::Link { attempt, event: LinkEvent::Ended(failure) });
        });

        self.link = Some(ActiveLink { attempt, requests: None, task });
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }

    fn on_link_event(&mut self, attempt: AttemptId, event: LinkEvent) {
        if self.link.as_ref().map(|l| l.attempt) != Some(attempt) {
            debug!(%attempt, "ignoring event from superseded attempt");
            return;
        }
        match event {
            LinkEvent::Opened(requests) => {
                if !self.machine.on_open(attempt) {
                    return;
                }
                if let Some(link) = self.link.as_mut() {
                    link.requests = Some(requests);
                }
                self.publish_status();
                self.flush_activity(true);
            }
            LinkEvent::Frame(msg) => self.on_live_message(msg),
            LinkEvent::Ended(failure) => {
                let Some(retry) = self.machine.on_failure(attempt, failure) else {
                    return;
                };
                self.drop_link();
                self.publish_status();
                match retry {
                    Retry::Now => self.start_attempt(),
                    Retry::After(delay) => {
                        debug!(?delay, "scheduling reconnect");
                        let inbox = self.inbox.clone();
                        self.retry = Some(tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            post(&inbox, AgentInput::RetryDue);
                        }));
                    }
                    Retry::Never => {}
                }
            }
        }
    }

    fn on_live_message(&mut self, msg: LiveMessage) {
        let out = match msg {
            LiveMessage::Sync(event) => {
                self.rewind.push(event.clone());
                AgentMessage::Sync(event)
            }
            LiveMessage::Settings(settings) => {
                self.settings = Some(settings.clone());
                AgentMessage::Settings(settings)
            }
            LiveMessage::Presence(presence) => AgentMessage::Presence(presence),
            LiveMessage::Users(users) => AgentMessage::Users(users),
        };
        self.ports.broadcast(&out);
    }

    fn publish_status(&mut self) {
        let state = self.machine.state();
        if state == self.published {
            return;
        }
        self.published = state;
        info!(%state, tabs = self.ports.len(), "connection status changed");
        self.ports.broadcast(&AgentMessage::Status(state));
    }

    // ── Activity ─────────────────────────────────────────────────────────

    /// Push aggregated activity upstream. `fresh` sends everything known,
    /// for a connection that has seen nothing yet.
    fn flush_activity(&mut self, fresh: bool) {
        if self.machine.state() != ConnectionState::Connected {
            return;
        }
        let Some(requests) = self.link.as_ref().and_then(|l| l.requests.as_ref()) else {
            return;
        };
        let activity = if fresh { self.activity.take_all() } else { self.activity.take_if_changed() };
        if let Some(activity) = activity {
            debug!(subjects = activity.len(), "flushing activity");
            if requests.send(UpstreamRequest::Activity { activity }).is_err() {
                warn!("upstream link closed before activity flush");
            }
        }
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn the agent on the current runtime. It connects immediately.
pub fn spawn_agent(config: AgentConfig, upstream: Arc<dyn Upstream>, locks: LockManager) -> AgentHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = Agent::new(config, upstream, locks, tx.downgrade());
    tokio::spawn(agent.run(rx));
    AgentHandle { tx }
}
