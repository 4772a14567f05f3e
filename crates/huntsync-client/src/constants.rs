//! Engine configuration constants.
//!
//! Centralizes the defaults that [`crate::config`] falls back to.

use std::time::Duration;

/// Upstream stream endpoint used when nothing else is configured.
pub const DEFAULT_STREAM_URL: &str = "ws://localhost:9090/rx";

/// Snapshot/write API base used when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api";

/// Authoritative events retained for replay to newly attached tabs.
pub const REWIND_CAPACITY: usize = 256;

/// First reconnect delay, and the value backoff resets to after a handshake.
pub const BACKOFF_FLOOR: Duration = Duration::from_millis(500);

/// Reconnect delays never exceed this.
pub const BACKOFF_CEILING: Duration = Duration::from_secs(4);

/// Bound on a single connection attempt before it is abandoned and retried.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often aggregated activity is pushed upstream (only when it changed).
pub const ACTIVITY_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Close code the stream uses when a requested replay point is gone.
pub const CLOSE_REPLAY_UNAVAILABLE: u16 = 4004;

/// Close code the stream uses when no backend is feeding it yet.
pub const CLOSE_NO_BACKEND: u16 = 4005;

/// Response header carrying the change id assigned to a write.
pub const CHANGE_ID_HEADER: &str = "X-Change-ID";

/// Timeout for a single write/snapshot HTTP request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Capacity of each tab's event broadcast channel.
pub const TAB_EVENT_CAPACITY: usize = 64;

/// File name of the persisted mute preference.
pub const MUTE_FILE_NAME: &str = "muted";
