//! The derived, display-ready view of a tab's state.
//!
//! Rounds are ordered special-first, then by `sort`, then by id. Within a
//! round, non-metas come before metas, and each group is ordered:
//!
//! 1. reminders already due, oldest first
//! 2. no reminder, by name (case-insensitive)
//! 3. reminders still in the future, soonest first
//!
//! with puzzle id as the final tie-break so the order is total.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use huntsync_types::{Puzzle, PuzzleId, Round, RoundId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundView {
    pub round: Round,
    /// URL fragment for the round.
    pub anchor: String,
    pub display_name: String,
    /// Every required puzzle (the metas, or all puzzles if there are none)
    /// has an answer, and the round isn't empty.
    pub complete: bool,
    pub solved: usize,
    pub total: usize,
    pub puzzles: Vec<Puzzle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PuzzleView {
    pub rounds: Vec<RoundView>,
    /// All puzzles, including those whose round isn't known.
    pub puzzle_count: usize,
    pub solved_count: usize,
}

impl PuzzleView {
    pub fn derive(
        puzzles: &BTreeMap<PuzzleId, Puzzle>,
        rounds: &BTreeMap<RoundId, Round>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut grouped: BTreeMap<RoundId, Vec<Puzzle>> = BTreeMap::new();
        for p in puzzles.values() {
            grouped.entry(p.round).or_default().push(p.clone());
        }

        let mut out: Vec<RoundView> = rounds
            .values()
            .map(|r| {
                let mut list = grouped.remove(&r.id).unwrap_or_default();
                list.sort_by(|a, b| puzzle_order(a, b, now));
                hydrate(r.clone(), list)
            })
            .collect();
        out.sort_by(|a, b| round_order(&a.round, &b.round));

        PuzzleView {
            rounds: out,
            puzzle_count: puzzles.len(),
            solved_count: puzzles.values().filter(|p| p.is_solved()).count(),
        }
    }

    pub fn puzzle(&self, id: PuzzleId) -> Option<&Puzzle> {
        self.rounds.iter().flat_map(|r| r.puzzles.iter()).find(|p| p.id == id)
    }

    pub fn round(&self, id: RoundId) -> Option<&RoundView> {
        self.rounds.iter().find(|r| r.round.id == id)
    }
}

fn hydrate(round: Round, puzzles: Vec<Puzzle>) -> RoundView {
    let has_metas = puzzles.iter().any(|p| p.meta);
    let complete = !puzzles.is_empty()
        && puzzles
            .iter()
            .filter(|p| !has_metas || p.meta)
            .all(Puzzle::is_solved);
    RoundView {
        anchor: anchor(&round.name),
        display_name: display_name(&round),
        complete,
        solved: puzzles.iter().filter(|p| p.is_solved()).count(),
        total: puzzles.len(),
        puzzles,
        round,
    }
}

/// Trimmed, lower-cased, with each run of non-alphanumerics collapsed to `-`.
pub fn anchor(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

/// Emoji (forced to emoji presentation) then name.
pub fn display_name(round: &Round) -> String {
    format!("{}\u{FE0F} {}", round.emoji, round.name)
}

fn round_order(a: &Round, b: &Round) -> Ordering {
    b.special
        .cmp(&a.special)
        .then(a.sort.cmp(&b.sort))
        .then(a.id.cmp(&b.id))
}

fn puzzle_order(a: &Puzzle, b: &Puzzle, now: DateTime<Utc>) -> Ordering {
    let bucket = |p: &Puzzle| match p.reminder {
        Some(t) if t <= now => 0,
        None => 1,
        Some(_) => 2,
    };
    a.meta
        .cmp(&b.meta)
        .then_with(|| bucket(a).cmp(&bucket(b)))
        .then_with(|| match (a.reminder, b.reminder) {
            (Some(ra), Some(rb)) => ra.cmp(&rb),
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        })
        .then(a.id.cmp(&b.id))
}
