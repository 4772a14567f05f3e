//! Puzzles, rounds, and the partial deltas applied to them.
//!
//! Entities arrive whole: from the snapshot API, inside upsert events, and in
//! create responses. Patches are the partial form used by update requests and
//! by optimistic entries. A patch built from a full entity is *complete* and
//! can stand in for an entity the authoritative maps have not seen yet.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::EnumString;

use crate::ids::{PuzzleId, RoundId};

// ============================================================================
// Status
// ============================================================================

/// Solving status of a puzzle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Status {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "", serialize = "not started", serialize = "notstarted")]
    NotStarted,
    Working,
    Abandoned,
    Solved,
    Backsolved,
    Purchased,
}

impl Status {
    /// Parse from string (case-insensitive). The empty string is `NotStarted`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s.trim()).ok()
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotStarted => "",
            Status::Working => "Working",
            Status::Abandoned => "Abandoned",
            Status::Solved => "Solved",
            Status::Backsolved => "Backsolved",
            Status::Purchased => "Purchased",
        }
    }

    /// Human-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotStarted => "Not Started",
            other => other.as_str(),
        }
    }

    /// Whether a puzzle in this status is expected to carry an answer.
    pub fn needs_answer(&self) -> bool {
        matches!(self, Status::Solved | Status::Backsolved | Status::Purchased)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A puzzle, as the server last reported it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: PuzzleId,
    pub name: String,
    #[serde(default)]
    pub answer: String,
    pub round: RoundId,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub puzzle_url: String,
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default)]
    pub discord_channel: String,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub voice_room: String,
    #[serde(default, deserialize_with = "deserialize_reminder")]
    pub reminder: Option<DateTime<Utc>>,
}

impl Puzzle {
    /// A puzzle counts as solved once it has a non-empty answer.
    pub fn is_solved(&self) -> bool {
        !self.answer.is_empty()
    }
}

/// A round: a named group of puzzles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub name: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub hue: i64,
    /// Special rounds are pinned ahead of the normal sort order.
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub sort: i64,
}

/// Either kind of entity, as returned by a create request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Puzzle(Puzzle),
    Round(Round),
}

/// Which entity table a change touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Puzzle,
    Round,
}

/// Reminders travel as RFC 3339 strings. The backend encodes "no reminder"
/// as an empty string, `null`, or its zero time (year 1), so anything before
/// 2000 is treated as unset.
pub fn deserialize_reminder<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let ts = DateTime::parse_from_rfc3339(s)
                .map_err(serde::de::Error::custom)?
                .with_timezone(&Utc);
            Ok((ts.year() >= 2000).then_some(ts))
        }
    }
}

// ============================================================================
// New entities
// ============================================================================

/// Parameters for creating a puzzle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPuzzle {
    pub name: String,
    pub round: RoundId,
    pub puzzle_url: String,
}

/// Parameters for creating a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRound {
    pub name: String,
    pub emoji: String,
    #[serde(default)]
    pub hue: i64,
    #[serde(default)]
    pub sort: i64,
    #[serde(default)]
    pub special: bool,
}

// ============================================================================
// Patches
// ============================================================================

/// A partial puzzle. `None` fields are left untouched when applied.
///
/// `reminder` is doubly optional: `Some(None)` clears the reminder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PuzzlePatch {
    pub name: Option<String>,
    pub answer: Option<String>,
    pub round: Option<RoundId>,
    pub status: Option<Status>,
    pub note: Option<String>,
    pub location: Option<String>,
    pub puzzle_url: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub discord_channel: Option<String>,
    pub meta: Option<bool>,
    pub voice_room: Option<String>,
    pub reminder: Option<Option<DateTime<Utc>>>,
}

impl PuzzlePatch {
    /// Convenience: a patch that only changes status.
    pub fn status(status: Status) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    /// Convenience: mark solved with an answer.
    pub fn solved(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            status: Some(Status::Solved),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge this patch over an existing puzzle.
    pub fn apply_to(&self, p: &mut Puzzle) {
        if let Some(v) = &self.name {
            p.name = v.clone();
        }
        if let Some(v) = &self.answer {
            p.answer = v.clone();
        }
        if let Some(v) = self.round {
            p.round = v;
        }
        if let Some(v) = self.status {
            p.status = v;
        }
        if let Some(v) = &self.note {
            p.note = v.clone();
        }
        if let Some(v) = &self.location {
            p.location = v.clone();
        }
        if let Some(v) = &self.puzzle_url {
            p.puzzle_url = v.clone();
        }
        if let Some(v) = &self.spreadsheet_id {
            p.spreadsheet_id = v.clone();
        }
        if let Some(v) = &self.discord_channel {
            p.discord_channel = v.clone();
        }
        if let Some(v) = self.meta {
            p.meta = v;
        }
        if let Some(v) = &self.voice_room {
            p.voice_room = v.clone();
        }
        if let Some(v) = self.reminder {
            p.reminder = v;
        }
    }

    /// Build a whole puzzle from this patch, if it carries the fields a
    /// puzzle cannot exist without (name and round).
    pub fn to_puzzle(&self, id: PuzzleId) -> Option<Puzzle> {
        let name = self.name.clone()?;
        let round = self.round?;
        let mut p = Puzzle {
            id,
            name,
            answer: String::new(),
            round,
            status: Status::NotStarted,
            note: String::new(),
            location: String::new(),
            puzzle_url: String::new(),
            spreadsheet_id: String::new(),
            discord_channel: String::new(),
            meta: false,
            voice_room: String::new(),
            reminder: None,
        };
        self.apply_to(&mut p);
        Some(p)
    }

    /// Form fields for an update request. Only set fields are sent.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = &self.name {
            out.push(("name", v.clone()));
        }
        if let Some(v) = &self.answer {
            out.push(("answer", v.clone()));
        }
        if let Some(v) = self.round {
            out.push(("round", v.to_string()));
        }
        if let Some(v) = self.status {
            out.push(("status", v.as_str().to_string()));
        }
        if let Some(v) = &self.note {
            out.push(("note", v.clone()));
        }
        if let Some(v) = &self.location {
            out.push(("location", v.clone()));
        }
        if let Some(v) = &self.puzzle_url {
            out.push(("puzzle_url", v.clone()));
        }
        if let Some(v) = &self.spreadsheet_id {
            out.push(("spreadsheet_id", v.clone()));
        }
        if let Some(v) = &self.discord_channel {
            out.push(("discord_channel", v.clone()));
        }
        if let Some(v) = self.meta {
            out.push(("meta", v.to_string()));
        }
        if let Some(v) = &self.voice_room {
            out.push(("voice_room", v.clone()));
        }
        if let Some(v) = self.reminder {
            out.push(("reminder", v.map(|t| t.to_rfc3339()).unwrap_or_default()));
        }
        out
    }
}

impl From<Puzzle> for PuzzlePatch {
    fn from(p: Puzzle) -> Self {
        Self {
            name: Some(p.name),
            answer: Some(p.answer),
            round: Some(p.round),
            status: Some(p.status),
            note: Some(p.note),
            location: Some(p.location),
            puzzle_url: Some(p.puzzle_url),
            spreadsheet_id: Some(p.spreadsheet_id),
            discord_channel: Some(p.discord_channel),
            meta: Some(p.meta),
            voice_room: Some(p.voice_room),
            reminder: Some(p.reminder),
        }
    }
}

/// A partial round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundPatch {
    pub name: Option<String>,
    pub emoji: Option<String>,
    pub hue: Option<i64>,
    pub special: Option<bool>,
    pub sort: Option<i64>,
}

impl RoundPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, r: &mut Round) {
        if let Some(v) = &self.name {
            r.name = v.clone();
        }
        if let Some(v) = &self.emoji {
            r.emoji = v.clone();
        }
        if let Some(v) = self.hue {
            r.hue = v;
        }
        if let Some(v) = self.special {
            r.special = v;
        }
        if let Some(v) = self.sort {
            r.sort = v;
        }
    }

    /// Build a whole round, if the patch names it.
    pub fn to_round(&self, id: RoundId) -> Option<Round> {
        let mut r = Round {
            id,
            name: self.name.clone()?,
            emoji: String::new(),
            hue: 0,
            special: false,
            sort: 0,
        };
        self.apply_to(&mut r);
        Some(r)
    }

    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = &self.name {
            out.push(("name", v.clone()));
        }
        if let Some(v) = &self.emoji {
            out.push(("emoji", v.clone()));
        }
        if let Some(v) = self.hue {
            out.push(("hue", v.to_string()));
        }
        if let Some(v) = self.special {
            out.push(("special", v.to_string()));
        }
        if let Some(v) = self.sort {
            out.push(("sort", v.to_string()));
        }
        out
    }
}

impl From<Round> for RoundPatch {
    fn from(r: Round) -> Self {
        Self {
            name: Some(r.name),
            emoji: Some(r.emoji),
            hue: Some(r.hue),
            special: Some(r.special),
            sort: Some(r.sort),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn puzzle_json(id: i64, round: i64) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("Puzzle {id}"),
            "answer": "",
            "round": round,
            "status": "",
            "note": "",
            "location": "",
            "puzzle_url": "https://example.com/p",
            "spreadsheet_id": "",
            "discord_channel": "",
            "meta": false,
            "voice_room": "",
            "reminder": "0001-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&Status::NotStarted).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Status::Working).unwrap(), "\"Working\"");
        let s: Status = serde_json::from_str("\"Backsolved\"").unwrap();
        assert_eq!(s, Status::Backsolved);
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(Status::from_str("working"), Some(Status::Working));
        assert_eq!(Status::from_str("SOLVED"), Some(Status::Solved));
        assert_eq!(Status::from_str(""), Some(Status::NotStarted));
        assert_eq!(Status::from_str("bogus"), None);
    }

    #[test]
    fn test_needs_answer() {
        assert!(Status::Solved.needs_answer());
        assert!(Status::Purchased.needs_answer());
        assert!(!Status::Working.needs_answer());
        assert!(!Status::NotStarted.needs_answer());
    }

    #[test]
    fn test_zero_reminder_is_none() {
        let p: Puzzle = serde_json::from_value(puzzle_json(1, 1)).unwrap();
        assert_eq!(p.reminder, None);

        let mut raw = puzzle_json(2, 1);
        raw["reminder"] = json!("2026-01-16T12:00:00Z");
        let p: Puzzle = serde_json::from_value(raw).unwrap();
        assert_eq!(p.reminder.unwrap().to_rfc3339(), "2026-01-16T12:00:00+00:00");

        let mut raw = puzzle_json(3, 1);
        raw["reminder"] = serde_json::Value::Null;
        let p: Puzzle = serde_json::from_value(raw).unwrap();
        assert_eq!(p.reminder, None);
    }

    #[test]
    fn test_patch_apply_only_touches_set_fields() {
        let mut p: Puzzle = serde_json::from_value(puzzle_json(1, 1)).unwrap();
        PuzzlePatch::status(Status::Working).apply_to(&mut p);
        assert_eq!(p.status, Status::Working);
        assert_eq!(p.name, "Puzzle 1");
        assert!(!p.is_solved());

        PuzzlePatch::solved("BANANA").apply_to(&mut p);
        assert!(p.is_solved());
        assert_eq!(p.status, Status::Solved);
    }

    #[test]
    fn test_any_non_empty_answer_counts_as_solved() {
        let mut p: Puzzle = serde_json::from_value(puzzle_json(1, 1)).unwrap();
        assert!(!p.is_solved());
        p.answer = " ".into();
        assert!(p.is_solved());
    }

    #[test]
    fn test_patch_from_full_puzzle_materializes() {
        let p: Puzzle = serde_json::from_value(puzzle_json(5, 2)).unwrap();
        let patch = PuzzlePatch::from(p.clone());
        assert_eq!(patch.to_puzzle(p.id), Some(p));
        assert_eq!(PuzzlePatch::status(Status::Working).to_puzzle(PuzzleId(5)), None);
    }

    #[test]
    fn test_form_fields_skip_unset() {
        let fields = PuzzlePatch::status(Status::Working).form_fields();
        assert_eq!(fields, vec![("status", "Working".to_string())]);

        let clear = PuzzlePatch { reminder: Some(None), ..Default::default() };
        assert_eq!(clear.form_fields(), vec![("reminder", String::new())]);
    }

    #[test]
    fn test_round_patch_to_round() {
        let patch = RoundPatch { name: Some("Metas".into()), special: Some(true), ..Default::default() };
        let r = patch.to_round(RoundId(3)).unwrap();
        assert!(r.special);
        assert_eq!(r.sort, 0);
        assert_eq!(RoundPatch::default().to_round(RoundId(3)), None);
    }
}
