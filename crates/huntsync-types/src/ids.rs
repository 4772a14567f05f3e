//! Typed identifiers for entities, changes, and tabs.
//!
//! Entity ids are server-assigned integers, unique within their type. They are
//! transparent on the wire (plain JSON numbers) and only typed on the Rust side
//! so a `PuzzleId` can never be passed where a `RoundId` is expected.
//!
//! `ChangeId` is the server's mutation counter. It totally orders every change
//! across both entity types and is the reconciler's ordering key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A puzzle identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PuzzleId(pub i64);

/// A round identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub i64);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_entity_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// The raw integer id.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $T {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $name, self.0)
            }
        }
    };
}

impl_entity_id!(PuzzleId, "Puzzle");
impl_entity_id!(RoundId, "Round");

// ── ChangeId ────────────────────────────────────────────────────────────────

/// A server-assigned, strictly increasing mutation id.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub u64);

impl ChangeId {
    /// The watermark before anything has been applied.
    pub const ZERO: ChangeId = ChangeId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    /// The id that would directly follow this one in a gap-free stream.
    pub fn next(self) -> ChangeId {
        ChangeId(self.0.saturating_add(1))
    }
}

impl From<u64> for ChangeId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

// ── TabId ───────────────────────────────────────────────────────────────────

/// Identifies one attached tab. Also the name of the tab's liveness lock.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(uuid::Uuid);

impl TabId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TabId({})", self.short())
    }
}
