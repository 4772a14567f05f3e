//! Messages on the authoritative stream, and the snapshot that precedes them.
//!
//! The upstream socket carries JSON text frames shaped `{"event": .., "data": ..}`.
//! [`LiveMessage::decode`] turns one frame into a closed enum; anything it does
//! not recognize is a [`DecodeError`] for the caller to log and drop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityType, Puzzle, Round, deserialize_reminder};
use crate::ids::{ChangeId, PuzzleId, RoundId};

// ============================================================================
// Sync events
// ============================================================================

/// One authoritative mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSyncEvent", into = "RawSyncEvent")]
pub struct SyncEvent {
    pub change_id: ChangeId,
    pub change: Change,
}

/// What a [`SyncEvent`] did. Upserts carry the post-mutation entity; deletes
/// carry only its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    UpsertPuzzle(Puzzle),
    DeletePuzzle(PuzzleId),
    UpsertRound(Round),
    DeleteRound(RoundId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upsert,
    Delete,
}

impl SyncEvent {
    pub fn kind(&self) -> ChangeKind {
        match self.change {
            Change::UpsertPuzzle(_) | Change::UpsertRound(_) => ChangeKind::Upsert,
            Change::DeletePuzzle(_) | Change::DeleteRound(_) => ChangeKind::Delete,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self.change {
            Change::UpsertPuzzle(_) | Change::DeletePuzzle(_) => EntityType::Puzzle,
            Change::UpsertRound(_) | Change::DeleteRound(_) => EntityType::Round,
        }
    }
}

/// Wire shape of a sync event.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawSyncEvent {
    change_id: ChangeId,
    kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    puzzle: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    round: Option<serde_json::Value>,
    /// Older backends serialized the reminder separately from the puzzle.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_reminder")]
    reminder_fix: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: i64,
}

/// Why a wire event could not be turned into a [`SyncEvent`].
#[derive(Debug, thiserror::Error)]
pub enum SyncEventError {
    #[error("sync event {0} names neither a puzzle nor a round")]
    MissingEntity(ChangeId),
    #[error("sync event {0} names both a puzzle and a round")]
    AmbiguousEntity(ChangeId),
    #[error("sync event {change_id}: malformed {entity}: {source}")]
    Malformed {
        change_id: ChangeId,
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl TryFrom<RawSyncEvent> for SyncEvent {
    type Error = SyncEventError;

    fn try_from(raw: RawSyncEvent) -> Result<Self, Self::Error> {
        let change_id = raw.change_id;
        let malformed = |entity: &'static str| {
            move |source: serde_json::Error| SyncEventError::Malformed { change_id, entity, source }
        };
        let change = match (raw.kind, raw.puzzle, raw.round) {
            (_, None, None) => return Err(SyncEventError::MissingEntity(change_id)),
            (_, Some(_), Some(_)) => return Err(SyncEventError::AmbiguousEntity(change_id)),
            (ChangeKind::Upsert, Some(p), None) => {
                let mut puzzle: Puzzle = serde_json::from_value(p).map_err(malformed("puzzle"))?;
                if raw.reminder_fix.is_some() {
                    puzzle.reminder = raw.reminder_fix;
                }
                Change::UpsertPuzzle(puzzle)
            }
            (ChangeKind::Upsert, None, Some(r)) => {
                Change::UpsertRound(serde_json::from_value(r).map_err(malformed("round"))?)
            }
            (ChangeKind::Delete, Some(p), None) => {
                let IdOnly { id } = serde_json::from_value(p).map_err(malformed("puzzle"))?;
                Change::DeletePuzzle(PuzzleId(id))
            }
            (ChangeKind::Delete, None, Some(r)) => {
                let IdOnly { id } = serde_json::from_value(r).map_err(malformed("round"))?;
                Change::DeleteRound(RoundId(id))
            }
        };
        Ok(SyncEvent { change_id, change })
    }
}

impl From<SyncEvent> for RawSyncEvent {
    fn from(ev: SyncEvent) -> Self {
        let kind = ev.kind();
        let (puzzle, round) = match ev.change {
            Change::UpsertPuzzle(p) => (serde_json::to_value(p).ok(), None),
            Change::DeletePuzzle(id) => (Some(serde_json::json!({ "id": id })), None),
            Change::UpsertRound(r) => (None, serde_json::to_value(r).ok()),
            Change::DeleteRound(id) => (None, Some(serde_json::json!({ "id": id }))),
        };
        RawSyncEvent { change_id: ev.change_id, kind, puzzle, round, reminder_fix: None }
    }
}

// ============================================================================
// Settings, presence, users
// ============================================================================

/// Hunt-wide settings, pushed on connect and whenever they change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub hunt_name: String,
    #[serde(default)]
    pub hunt_url: String,
    #[serde(default)]
    pub hunt_credentials: String,
    #[serde(default)]
    pub logistics_url: String,
    #[serde(default)]
    pub discord_guild: String,
    #[serde(default)]
    pub hanging_out: String,
    #[serde(default)]
    pub next_hunt: Option<DateTime<Utc>>,
    /// Channel id → raw label, e.g. `"Puzzle Room 🎧"`.
    #[serde(default)]
    pub voice_rooms: BTreeMap<String, String>,
}

/// Emoji used when a voice room label doesn't end in one.
pub const DEFAULT_VOICE_ROOM_EMOJI: &str = "📻";

/// A parsed voice room label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceRoom {
    pub id: String,
    pub name: String,
    pub emoji: String,
}

impl Settings {
    /// Voice rooms with their trailing emoji split off.
    pub fn voice_rooms(&self) -> Vec<VoiceRoom> {
        self.voice_rooms
            .iter()
            .map(|(id, raw)| parse_voice_room(id, raw))
            .collect()
    }
}

fn parse_voice_room(id: &str, raw: &str) -> VoiceRoom {
    if let Some((name, last)) = raw.rsplit_once(' ') {
        if last.chars().count() == 1 {
            return VoiceRoom { id: id.to_string(), name: name.to_string(), emoji: last.to_string() };
        }
    }
    VoiceRoom {
        id: id.to_string(),
        name: raw.to_string(),
        emoji: DEFAULT_VOICE_ROOM_EMOJI.to_string(),
    }
}

/// Who is actively looking at which puzzle: puzzle → user → active.
pub type Presence = BTreeMap<PuzzleId, BTreeMap<String, bool>>;

/// Directory of hunters: user id → (display name, avatar).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Users {
    #[serde(default)]
    pub users: BTreeMap<String, (String, String)>,
    /// When set, `users` is the complete directory rather than a delta.
    #[serde(default)]
    pub replace: bool,
}

// ============================================================================
// LiveMessage
// ============================================================================

/// Everything the upstream stream can deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveMessage {
    Sync(SyncEvent),
    Settings(Settings),
    Presence(Presence),
    Users(Users),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event type {0:?}")]
    UnknownEvent(String),
}

impl LiveMessage {
    /// Decode one `{"event": .., "data": ..}` text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        Ok(match event.as_str() {
            "sync" => LiveMessage::Sync(serde_json::from_value(data)?),
            "settings" => LiveMessage::Settings(serde_json::from_value(data)?),
            "presence" => LiveMessage::Presence(serde_json::from_value(data)?),
            "users" => LiveMessage::Users(serde_json::from_value(data)?),
            _ => return Err(DecodeError::UnknownEvent(event)),
        })
    }

    /// The event tag used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveMessage::Sync(_) => "sync",
            LiveMessage::Settings(_) => "settings",
            LiveMessage::Presence(_) => "presence",
            LiveMessage::Users(_) => "users",
        }
    }

    /// Encode back into an envelope (used by test servers and fakes).
    pub fn encode(&self) -> String {
        let data = match self {
            LiveMessage::Sync(ev) => serde_json::to_value(ev),
            LiveMessage::Settings(s) => serde_json::to_value(s),
            LiveMessage::Presence(p) => serde_json::to_value(p),
            LiveMessage::Users(u) => serde_json::to_value(u),
        }
        .unwrap_or(serde_json::Value::Null);
        serde_json::json!({ "event": self.event_name(), "data": data }).to_string()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Response of the initial snapshot API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Watermark: the last change already reflected in this snapshot.
    pub change_id: ChangeId,
    #[serde(default)]
    pub puzzles: Vec<Puzzle>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default)]
    pub settings: Settings,
    /// The first stream event after this snapshot may skip ahead of
    /// `change_id + 1` without implying lost updates.
    #[serde(default)]
    pub known_gap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn puzzle(id: i64) -> serde_json::Value {
        json!({ "id": id, "name": "Fish", "round": 1, "answer": "", "status": "Working" })
    }

    #[test]
    fn test_decode_upsert_puzzle() {
        let frame = json!({
            "event": "sync",
            "data": { "change_id": 11, "kind": "upsert", "puzzle": puzzle(4) }
        })
        .to_string();
        let LiveMessage::Sync(ev) = LiveMessage::decode(&frame).unwrap() else {
            panic!("expected sync");
        };
        assert_eq!(ev.change_id, ChangeId(11));
        assert_eq!(ev.kind(), ChangeKind::Upsert);
        assert_eq!(ev.entity_type(), EntityType::Puzzle);
        match ev.change {
            Change::UpsertPuzzle(p) => assert_eq!(p.id, PuzzleId(4)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_delete_needs_only_id() {
        let frame = json!({
            "event": "sync",
            "data": { "change_id": 12, "kind": "delete", "round": { "id": 3 } }
        })
        .to_string();
        let LiveMessage::Sync(ev) = LiveMessage::decode(&frame).unwrap() else {
            panic!("expected sync");
        };
        assert_eq!(ev.change, Change::DeleteRound(RoundId(3)));
    }

    #[test]
    fn test_reminder_fix_overrides_puzzle_reminder() {
        let raw = json!({
            "change_id": 3, "kind": "upsert", "puzzle": puzzle(1),
            "reminder_fix": "2026-01-17T09:00:00Z"
        });
        let ev: SyncEvent = serde_json::from_value(raw).unwrap();
        let Change::UpsertPuzzle(p) = ev.change else { panic!() };
        assert!(p.reminder.is_some());
    }

    #[test]
    fn test_event_without_entity_is_rejected() {
        let raw = json!({ "change_id": 3, "kind": "upsert" });
        assert!(serde_json::from_value::<SyncEvent>(raw).is_err());
    }

    #[test]
    fn test_unknown_event_type() {
        let err = LiveMessage::decode(r#"{"event":"m","data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent(ref e) if e == "m"));
    }

    #[test]
    fn test_encode_decode_sync() {
        let ev: SyncEvent = serde_json::from_value(json!({
            "change_id": 9, "kind": "delete", "puzzle": { "id": 2 }
        }))
        .unwrap();
        let msg = LiveMessage::Sync(ev);
        assert_eq!(LiveMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_voice_room_labels() {
        let mut settings = Settings::default();
        settings.voice_rooms.insert("1".into(), "Puzzle Room 🎧".into());
        settings.voice_rooms.insert("2".into(), "Quiet Corner".into());
        let rooms = settings.voice_rooms();
        assert_eq!(rooms[0].name, "Puzzle Room");
        assert_eq!(rooms[0].emoji, "🎧");
        assert_eq!(rooms[1].name, "Quiet Corner");
        assert_eq!(rooms[1].emoji, DEFAULT_VOICE_ROOM_EMOJI);
    }

    #[test]
    fn test_snapshot_reads_nested_settings() {
        let raw = json!({
            "change_id": 10,
            "puzzles": [puzzle(1)],
            "rounds": [{ "id": 1, "name": "Ocean", "emoji": "🌊" }],
            "settings": { "hunt_name": "Mystery Hunt", "voice_rooms": {} }
        });
        let snap: Snapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snap.change_id, ChangeId(10));
        assert_eq!(snap.settings.hunt_name, "Mystery Hunt");
        assert!(!snap.known_gap);
    }

    #[test]
    fn test_snapshot_without_settings_uses_defaults() {
        let raw = json!({ "change_id": 3, "puzzles": [], "rounds": [] });
        let snap: Snapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snap.settings, Settings::default());
    }

    #[test]
    fn test_presence_keys_parse_from_strings() {
        let msg = LiveMessage::decode(r#"{"event":"presence","data":{"4":{"alice":true}}}"#).unwrap();
        let LiveMessage::Presence(p) = msg else { panic!() };
        assert!(p[&PuzzleId(4)]["alice"]);
    }
}
