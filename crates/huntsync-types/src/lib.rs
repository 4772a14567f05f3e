//! Shared entity, event, and channel types for huntsync.
//!
//! This crate is the wire vocabulary: typed ids, puzzles and rounds, the
//! partial deltas applied to them, the authoritative sync stream, and the
//! messages tabs and the shared connection agent exchange. It does no I/O;
//! the engine builds on it.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`ChangeId`]      | Server mutation counter, the ordering key    |
//! | [`Puzzle`]        | A puzzle, as last reported by the server     |
//! | [`Round`]         | A group of puzzles                           |
//! | [`PuzzlePatch`]   | Partial puzzle (updates, optimistic entries) |
//! | [`SyncEvent`]     | One authoritative upsert or delete           |
//! | [`LiveMessage`]   | Anything the upstream stream delivers        |
//! | [`Snapshot`]      | Initial state plus its watermark             |
//! | [`TabMessage`]    | Tab → agent                                  |
//! | [`AgentMessage`]  | Agent → tab                                  |
//! |-------------------|----------------------------------------------|

pub mod channel;
pub mod entity;
pub mod event;
pub mod ids;

pub use channel::{AgentMessage, ConnectionState, TabMessage};
pub use entity::{
    Entity, EntityType, NewPuzzle, NewRound, Puzzle, PuzzlePatch, Round, RoundPatch, Status,
};
pub use event::{
    Change, ChangeKind, DecodeError, LiveMessage, Presence, Settings, Snapshot, SyncEvent,
    SyncEventError, Users, VoiceRoom,
};
pub use ids::{ChangeId, PuzzleId, RoundId, TabId};
