//! Messages exchanged between tabs and the shared connection agent.
//!
//! Both directions are closed, serde-tagged unions. Consumers match them
//! exhaustively, so a new variant is a compile error everywhere it matters.

use serde::{Deserialize, Serialize};

use crate::event::{Presence, Settings, SyncEvent, Users};
use crate::ids::{PuzzleId, TabId};

/// Connectivity of the agent's upstream connection, as tabs see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    /// Terminal: the stream can no longer be trusted to be gap-free.
    Dead,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tab → agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TabMessage {
    /// Register this tab. `id` names the liveness lock the tab holds.
    Start {
        id: TabId,
        /// The puzzle this tab is focused on, if any.
        #[serde(default)]
        scope: Option<PuzzleId>,
    },
    /// The tab's user became active or idle on `subject`.
    Activity {
        id: TabId,
        subject: PuzzleId,
        active: bool,
    },
}

impl TabMessage {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabMessage::Start { id, .. } | TabMessage::Activity { id, .. } => *id,
        }
    }
}

/// Agent → tab.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum AgentMessage {
    Sync(SyncEvent),
    Status(ConnectionState),
    Settings(Settings),
    Presence(Presence),
    Users(Users),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tab_message_wire_shape() {
        let id = TabId::new();
        let msg = TabMessage::Activity { id, subject: PuzzleId(3), active: true };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["event"], "activity");
        assert_eq!(v["subject"], 3);
        assert_eq!(msg.tab_id(), id);

        let start: TabMessage =
            serde_json::from_value(json!({ "event": "start", "id": id.to_string() })).unwrap();
        assert_eq!(start, TabMessage::Start { id, scope: None });
    }

    #[test]
    fn test_status_message_wire_shape() {
        let v = serde_json::to_value(AgentMessage::Status(ConnectionState::Dead)).unwrap();
        assert_eq!(v, json!({ "event": "status", "data": "dead" }));
    }
}
