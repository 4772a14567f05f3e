//! Real-time sync engine for huntsync.
//!
//! Two halves, connected only by message passing:
//!
//! - the **shared connection agent** ([`spawn_agent`]): one per origin. Owns
//!   the single upstream stream, a [`RewindBuffer`] of recent events, and the
//!   registry of attached tabs. Reconnects with backoff and goes `dead` when
//!   the stream can no longer resume without a gap.
//! - the **tab** ([`TabHandle`]): one per view. Seeds a [`Reconciler`] from the
//!   snapshot API, applies agent events in change-id order, layers its own
//!   [`OptimisticLog`] on top, and publishes a [`PuzzleView`].
//!
//! ```text
//!   backend ──▶ Upstream ──▶ Agent ──┬──▶ Port ──▶ Tab ──▶ PuzzleView
//!                             │      ├──▶ Port ──▶ Tab ──▶ PuzzleView
//!                       RewindBuffer └──▶ Port ──▶ Tab ──▶ PuzzleView
//!                                                   │
//!                                      HuntApi ◀────┘ (writes)
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod connection;
pub mod constants;
pub mod locks;
pub mod optimistic;
pub mod ports;
pub mod prefs;
pub mod reconciler;
pub mod rewind;
pub mod tab;
pub mod upstream;
pub mod view;

pub use agent::{AgentError, AgentHandle, Port, spawn_agent};
pub use api::{ApiError, HttpApi, HuntApi, WriteRequest, WriteResponse};
pub use config::{AgentConfig, ClientConfig, ConfigError};
pub use connection::{Backoff, ConnectionMachine, Failure, Retry};
pub use locks::{LockError, LockGuard, LockManager};
pub use optimistic::{OptimisticEntry, OptimisticLog, WriteKey};
pub use ports::{Activity, ActivityTable, PortRegistry};
pub use prefs::{MutePreference, PrefsError};
pub use reconciler::{Applied, Reconciler};
pub use rewind::RewindBuffer;
pub use tab::{ReloadReason, TabError, TabEvent, TabHandle, WriteStats};
pub use upstream::{Upstream, UpstreamError, UpstreamFrame, UpstreamLink, UpstreamRequest, WsUpstream};
pub use view::{PuzzleView, RoundView};

// Re-export the wire vocabulary so callers need only this crate.
pub use huntsync_types;
