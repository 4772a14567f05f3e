//! Upstream connection lifecycle, independent of any transport.
//!
//! [`ConnectionMachine`] decides *what* to do after each connection outcome;
//! the agent actor owns the timers and sockets and feeds outcomes back in.
//! Keeping the decisions here makes reconnect policy unit-testable without a
//! runtime.
//!
//! # State Machine
//!
//! ```text
//!            begin_attempt()                 on_open()
//!   Idle ─────────────────────▶ Connecting ────────────▶ Connected
//!    ▲                              │                        │
//!    │     on_failure() → Retry     │                        │
//!    └──────────────────────────────┴────────────────────────┘
//!                                   │
//!                                   │ close code 4004
//!                                   ▼
//!                                 Dead (terminal)
//! ```
//!
//! Every attempt gets a fresh [`AttemptId`]. Outcomes carrying an older id are
//! ignored, so a late close from an abandoned socket can't tear down its
//! replacement.

use std::time::Duration;

use huntsync_types::ConnectionState;
use tracing::{error, info, warn};

use crate::constants::{BACKOFF_CEILING, BACKOFF_FLOOR, CLOSE_NO_BACKEND, CLOSE_REPLAY_UNAVAILABLE};

// ============================================================================
// Backoff
// ============================================================================

/// Doubling reconnect delay, clamped to `[floor, ceiling]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_FLOOR, BACKOFF_CEILING)
    }
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self { floor, ceiling, current: floor }
    }

    /// The delay to use now. Doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    /// Peek at the delay `next_delay` would return.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

// ============================================================================
// Machine
// ============================================================================

/// Identifies one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

/// Internal phase. Tabs only see the coarser [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting(AttemptId),
    Connected(AttemptId),
    Dead,
}

/// Why an attempt (or an established connection) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The server closed the socket with a close frame.
    Closed { code: u16, reason: String },
    /// Transport error, or the stream ended without a close frame.
    Error(String),
    /// The attempt did not complete its handshake in time.
    TimedOut,
}

/// What the agent should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Now,
    After(Duration),
    Never,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    phase: Phase,
    backoff: Backoff,
    next_attempt: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self { phase: Phase::Idle, backoff, next_attempt: 1 }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// What tabs are told.
    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle | Phase::Connecting(_) => ConnectionState::Disconnected,
            Phase::Connected(_) => ConnectionState::Connected,
            Phase::Dead => ConnectionState::Dead,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.phase == Phase::Dead
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Start a new attempt, superseding any previous one. `None` once dead.
    pub fn begin_attempt(&mut self) -> Option<AttemptId> {
        if self.is_dead() {
            return None;
        }
        let id = AttemptId(self.next_attempt);
        self.next_attempt += 1;
        self.phase = Phase::Connecting(id);
        Some(id)
    }

    /// Handshake completed. Returns false for a superseded attempt.
    pub fn on_open(&mut self, attempt: AttemptId) -> bool {
        if self.phase != Phase::Connecting(attempt) {
            return false;
        }
        info!(%attempt, "upstream connected");
        self.phase = Phase::Connected(attempt);
        self.backoff.reset();
        true
    }

    /// An attempt or connection ended. `None` when `attempt` is stale.
    pub fn on_failure(&mut self, attempt: AttemptId, failure: Failure) -> Option<Retry> {
        match self.phase {
            Phase::Connecting(current) | Phase::Connected(current) if current == attempt => {}
            _ => return None,
        }

        let retry = match &failure {
            Failure::Closed { code, reason } if *code == CLOSE_REPLAY_UNAVAILABLE => {
                error!(%attempt, code, reason = %reason, "replay point no longer available, giving up");
                self.phase = Phase::Dead;
                return Some(Retry::Never);
            }
            Failure::Closed { code, reason } => {
                if *code == CLOSE_NO_BACKEND {
                    warn!(%attempt, "upstream has no backend connected yet");
                } else {
                    warn!(%attempt, code, reason = %reason, "upstream closed");
                }
                Retry::After(self.backoff.next_delay())
            }
            Failure::Error(msg) => {
                warn!(%attempt, error = %msg, "upstream connection failed");
                Retry::After(self.backoff.next_delay())
            }
            Failure::TimedOut => {
                warn!(%attempt, "upstream connection attempt timed out");
                // The timeout already waited; just grow the delay for later failures.
                self.backoff.next_delay();
                Retry::Now
            }
        };
        self.phase = Phase::Idle;
        Some(retry)
    }
}
