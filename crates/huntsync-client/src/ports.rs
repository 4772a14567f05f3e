//! Attached tabs and the activity they report.
//!
//! [`PortRegistry`] is the agent's fanout table. A send failure to one port is
//! logged and otherwise ignored: the port stays registered until its liveness
//! lock is released, so eviction has exactly one trigger.

use std::collections::BTreeMap;

use huntsync_types::{AgentMessage, Presence, PuzzleId, TabId};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Per-subject activity as sent upstream: active if any tab says so.
pub type Activity = BTreeMap<PuzzleId, bool>;

// ============================================================================
// PortRegistry
// ============================================================================

struct PortEntry {
    scope: Option<PuzzleId>,
    tx: mpsc::UnboundedSender<AgentMessage>,
}

#[derive(Default)]
pub struct PortRegistry {
    ports: BTreeMap<TabId, PortEntry>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a tab. Returns true if it was new.
    pub fn register(
        &mut self,
        id: TabId,
        scope: Option<PuzzleId>,
        tx: mpsc::UnboundedSender<AgentMessage>,
    ) -> bool {
        self.ports.insert(id, PortEntry { scope, tx }).is_none()
    }

    pub fn deregister(&mut self, id: TabId) -> bool {
        self.ports.remove(&id).is_some()
    }

    pub fn contains(&self, id: TabId) -> bool {
        self.ports.contains_key(&id)
    }

    /// Send to one tab. Returns false if the tab is unknown or unreachable.
    pub fn unicast(&self, id: TabId, msg: AgentMessage) -> bool {
        let Some(port) = self.ports.get(&id) else {
            debug!(tab = %id.short(), "unicast to unknown tab");
            return false;
        };
        deliver(id, port, msg)
    }

    /// Send to every tab, in registration-key order. Presence is narrowed to
    /// each tab's scope. Returns how many tabs were reached.
    pub fn broadcast(&self, msg: &AgentMessage) -> usize {
        let mut reached = 0;
        for (id, port) in &self.ports {
            let out = match (msg, port.scope) {
                (AgentMessage::Presence(presence), Some(scope)) => {
                    match scoped_presence(presence, scope) {
                        Some(p) => AgentMessage::Presence(p),
                        None => continue,
                    }
                }
                _ => msg.clone(),
            };
            if deliver(*id, port, out) {
                reached += 1;
            }
        }
        trace!(reached, total = self.ports.len(), "broadcast");
        reached
    }

    pub fn ids(&self) -> Vec<TabId> {
        self.ports.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

fn deliver(id: TabId, port: &PortEntry, msg: AgentMessage) -> bool {
    match port.tx.send(msg) {
        Ok(()) => true,
        Err(_) => {
            warn!(tab = %id.short(), "port closed, waiting for liveness lock to evict");
            false
        }
    }
}

fn scoped_presence(presence: &Presence, scope: PuzzleId) -> Option<Presence> {
    presence
        .get(&scope)
        .map(|users| Presence::from([(scope, users.clone())]))
}

// ============================================================================
// ActivityTable
// ============================================================================

/// Last activity reported by each tab, plus what was last pushed upstream.
#[derive(Debug, Default)]
pub struct ActivityTable {
    by_tab: BTreeMap<TabId, (PuzzleId, bool)>,
    last_sent: Option<Activity>,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, tab: TabId, subject: PuzzleId, active: bool) {
        self.by_tab.insert(tab, (subject, active));
    }

    pub fn remove(&mut self, tab: TabId) {
        self.by_tab.remove(&tab);
    }

    pub fn aggregate(&self) -> Activity {
        let mut out = Activity::new();
        for &(subject, active) in self.by_tab.values() {
            *out.entry(subject).or_insert(false) |= active;
        }
        out
    }

    /// The aggregate, if it differs from what was last taken.
    pub fn take_if_changed(&mut self) -> Option<Activity> {
        let current = self.aggregate();
        if self.last_sent.as_ref() == Some(&current) {
            return None;
        }
        if self.last_sent.is_none() && current.is_empty() {
            return None;
        }
        self.last_sent = Some(current.clone());
        Some(current)
    }

    /// The aggregate regardless of what was sent before (fresh connection).
    /// `None` if no tab has reported anything.
    pub fn take_all(&mut self) -> Option<Activity> {
        let current = self.aggregate();
        if current.is_empty() {
            return None;
        }
        self.last_sent = Some(current.clone());
        Some(current)
    }
}
