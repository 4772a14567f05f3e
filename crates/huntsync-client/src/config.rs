//! Engine configuration, loadable from RON.
//!
//! Every field has a default from [`crate::constants`], so a config file only
//! needs the values it changes:
//!
//! ```ron
//! (
//!     api_base: "https://hunt.example.com/api",
//!     agent: (stream_url: "wss://hunt.example.com/rx"),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::Backoff;
use crate::constants::{
    ACTIVITY_FLUSH_INTERVAL, BACKOFF_CEILING, BACKOFF_FLOOR, CONNECT_TIMEOUT, DEFAULT_API_BASE,
    DEFAULT_STREAM_URL, HTTP_TIMEOUT, REWIND_CAPACITY,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Settings for the shared connection agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub stream_url: String,
    pub rewind_capacity: usize,
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub connect_timeout_ms: u64,
    pub activity_flush_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            rewind_capacity: REWIND_CAPACITY,
            backoff_floor_ms: BACKOFF_FLOOR.as_millis() as u64,
            backoff_ceiling_ms: BACKOFF_CEILING.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            activity_flush_ms: ACTIVITY_FLUSH_INTERVAL.as_millis() as u64,
        }
    }
}

impl AgentConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_floor_ms),
            Duration::from_millis(self.backoff_ceiling_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Never zero; `tokio::time::interval` rejects that.
    pub fn activity_flush_interval(&self) -> Duration {
        Duration::from_millis(self.activity_flush_ms.max(1))
    }
}

/// Settings for one tab (API access) plus the agent it talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base: String,
    /// Sent verbatim as the `Cookie` header.
    pub session_cookie: Option<String>,
    pub http_timeout_ms: u64,
    pub agent: AgentConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            session_cookie: None,
            http_timeout_ms: HTTP_TIMEOUT.as_millis() as u64,
            agent: AgentConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
