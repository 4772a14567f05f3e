//! Authoritative state for one tab, advanced strictly in change-id order.
//!
//! The reconciler holds the entity maps as of its watermark. Events at or
//! below the watermark are replays and are dropped; the next event must be
//! exactly `watermark + 1`, except once right after a snapshot that declared
//! a known gap. Any other jump means an update was lost, and the caller must
//! reload rather than keep showing a silently wrong view.
//!
//! [`Reconciler::materialize`] layers an [`OptimisticLog`] on top to produce
//! the maps the view is derived from.

use std::collections::BTreeMap;

use huntsync_types::{
    Change, ChangeId, Puzzle, PuzzleId, Round, RoundId, Settings, Snapshot, SyncEvent,
};
use tracing::{debug, trace, warn};

use crate::optimistic::{OptimisticEntry, OptimisticLog};

/// Result of offering one event to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Applied; the watermark advanced.
    Changed,
    /// At or below the watermark. Nothing happened.
    Stale,
    /// Skipped ahead of the next expected id. Nothing happened.
    Drift { expected: ChangeId, got: ChangeId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciler {
    puzzles: BTreeMap<PuzzleId, Puzzle>,
    rounds: BTreeMap<RoundId, Round>,
    watermark: ChangeId,
    gap_allowed: bool,
    settings: Settings,
}

impl Reconciler {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            puzzles: snapshot.puzzles.into_iter().map(|p| (p.id, p)).collect(),
            rounds: snapshot.rounds.into_iter().map(|r| (r.id, r)).collect(),
            watermark: snapshot.change_id,
            gap_allowed: snapshot.known_gap,
            settings: snapshot.settings,
        }
    }

    pub fn watermark(&self) -> ChangeId {
        self.watermark
    }

    pub fn puzzles(&self) -> &BTreeMap<PuzzleId, Puzzle> {
        &self.puzzles
    }

    pub fn rounds(&self) -> &BTreeMap<RoundId, Round> {
        &self.rounds
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn apply(&mut self, event: &SyncEvent) -> Applied {
        let got = event.change_id;
        if got <= self.watermark {
            trace!(%got, watermark = %self.watermark, "stale event");
            return Applied::Stale;
        }
        let expected = self.watermark.next();
        if got != expected {
            if !self.gap_allowed {
                warn!(%expected, %got, "change id gap");
                return Applied::Drift { expected, got };
            }
            debug!(%expected, %got, "skipping declared snapshot gap");
        }
        self.gap_allowed = false;

        match &event.change {
            Change::UpsertPuzzle(p) => {
                self.puzzles.insert(p.id, p.clone());
            }
            Change::DeletePuzzle(id) => {
                self.puzzles.remove(id);
            }
            Change::UpsertRound(r) => {
                self.rounds.insert(r.id, r.clone());
            }
            Change::DeleteRound(id) => {
                self.rounds.remove(id);
            }
        }
        self.watermark = got;
        Applied::Changed
    }

    /// Apply events in order, stopping at the first drift.
    ///
    /// Returns `Changed` if anything applied and no drift occurred, the drift
    /// if one did, and `Stale` if every event was already known.
    pub fn apply_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a SyncEvent>) -> Applied {
        let mut outcome = Applied::Stale;
        for event in events {
            match self.apply(event) {
                Applied::Changed => outcome = Applied::Changed,
                Applied::Stale => {}
                drift @ Applied::Drift { .. } => return drift,
            }
        }
        outcome
    }

    /// Authoritative maps with `log` applied on top, in key order.
    ///
    /// A patch for an entity the maps don't have only shows up if it carries
    /// enough fields to stand alone (e.g. a confirmed create).
    pub fn materialize(
        &self,
        log: &OptimisticLog,
    ) -> (BTreeMap<PuzzleId, Puzzle>, BTreeMap<RoundId, Round>) {
        let mut puzzles = self.puzzles.clone();
        let mut rounds = self.rounds.clone();

        for (key, entry) in log.iter() {
            match entry {
                OptimisticEntry::Puzzle { id, patch } => match puzzles.get_mut(id) {
                    Some(p) => patch.apply_to(p),
                    None => match patch.to_puzzle(*id) {
                        Some(p) => {
                            puzzles.insert(*id, p);
                        }
                        None => debug!(%key, puzzle = ?id, "partial patch for unknown puzzle"),
                    },
                },
                OptimisticEntry::Round { id, patch } => match rounds.get_mut(id) {
                    Some(r) => patch.apply_to(r),
                    None => match patch.to_round(*id) {
                        Some(r) => {
                            rounds.insert(*id, r);
                        }
                        None => debug!(%key, round = ?id, "partial patch for unknown round"),
                    },
                },
                OptimisticEntry::DeletePuzzle(id) => {
                    puzzles.remove(id);
                }
                OptimisticEntry::DeleteRound(id) => {
                    rounds.remove(id);
                }
            }
        }
        (puzzles, rounds)
    }
}
