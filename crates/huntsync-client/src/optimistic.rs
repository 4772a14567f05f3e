//! A tab's not-yet-authoritative writes.
//!
//! Entries live in one ordered map keyed by [`WriteKey`]:
//!
//! | Key                  | Meaning                                   |
//! |----------------------|-------------------------------------------|
//! | `Confirmed(change)`  | The server accepted it as `change`        |
//! | `Local(n)`           | Pending: request still in flight          |
//!
//! Every confirmed key sorts before every local key, so iterating in key order
//! applies confirmed writes in server order and then pending writes in issue
//! order, which is the order the reconciler materializes them in. The two
//! halves never share keys, whatever value the server's change ids reach.

use std::collections::BTreeMap;

use huntsync_types::{ChangeId, PuzzleId, PuzzlePatch, RoundId, RoundPatch};

/// Key of an optimistic entry: either a change id or a local counter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WriteKey {
    Confirmed(ChangeId),
    Local(u64),
}

impl WriteKey {
    /// Still waiting on its request.
    pub fn is_local(self) -> bool {
        matches!(self, WriteKey::Local(_))
    }

    /// The change id, for confirmed keys.
    pub fn change_id(self) -> Option<ChangeId> {
        match self {
            WriteKey::Confirmed(id) => Some(id),
            WriteKey::Local(_) => None,
        }
    }
}

impl From<ChangeId> for WriteKey {
    fn from(id: ChangeId) -> Self {
        WriteKey::Confirmed(id)
    }
}

impl std::fmt::Display for WriteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteKey::Confirmed(id) => write!(f, "@{id}"),
            WriteKey::Local(n) => write!(f, "local+{n}"),
        }
    }
}

/// A speculative change to one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptimisticEntry {
    Puzzle { id: PuzzleId, patch: PuzzlePatch },
    Round { id: RoundId, patch: RoundPatch },
    DeletePuzzle(PuzzleId),
    DeleteRound(RoundId),
}

#[derive(Debug, Default)]
pub struct OptimisticLog {
    entries: BTreeMap<WriteKey, OptimisticEntry>,
    next_local: u64,
}

impl OptimisticLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write whose request has not settled. Keys are never reused.
    pub fn insert_pending(&mut self, entry: OptimisticEntry) -> WriteKey {
        let key = WriteKey::Local(self.next_local);
        self.next_local = self.next_local.wrapping_add(1);
        self.entries.insert(key, entry);
        key
    }

    /// Record a write the server accepted as `change_id`.
    ///
    /// Ignored (returns false) if the authoritative state already includes
    /// that change, since the entry would then override newer data.
    pub fn confirm(&mut self, change_id: ChangeId, entry: OptimisticEntry, watermark: ChangeId) -> bool {
        if change_id <= watermark {
            return false;
        }
        self.entries.insert(WriteKey::from(change_id), entry);
        true
    }

    pub fn remove(&mut self, key: WriteKey) -> Option<OptimisticEntry> {
        self.entries.remove(&key)
    }

    /// Drop every confirmed entry at or below `watermark`. Pending entries stay.
    /// Returns how many were dropped.
    pub fn prune_through(&mut self, watermark: ChangeId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| !matches!(key, WriteKey::Confirmed(id) if *id <= watermark));
        before - self.entries.len()
    }

    /// Entries in materialization order.
    pub fn iter(&self) -> impl Iterator<Item = (WriteKey, &OptimisticEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn get(&self, key: WriteKey) -> Option<&OptimisticEntry> {
        self.entries.get(&key)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.range(WriteKey::Local(0)..).count()
    }

    pub fn confirmed_count(&self) -> usize {
        self.entries.len() - self.pending_count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntsync_types::Status;

    fn working(id: i64) -> OptimisticEntry {
        OptimisticEntry::Puzzle { id: PuzzleId(id), patch: PuzzlePatch::status(Status::Working) }
    }

    #[test]
    fn test_pending_keys_are_increasing_and_local() {
        let mut log = OptimisticLog::new();
        let a = log.insert_pending(working(1));
        let b = log.insert_pending(working(2));
        assert!(a < b);
        assert!(a.is_local() && b.is_local());
        assert_eq!(a.change_id(), None);
        assert_eq!(log.pending_count(), 2);
        assert_eq!(log.confirmed_count(), 0);
    }

    #[test]
    fn test_confirmed_iterate_before_pending() {
        let mut log = OptimisticLog::new();
        let pending = log.insert_pending(working(1));
        assert!(log.confirm(ChangeId(20), working(2), ChangeId(10)));
        assert!(log.confirm(ChangeId(15), OptimisticEntry::DeletePuzzle(PuzzleId(3)), ChangeId(10)));

        let keys: Vec<WriteKey> = log.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![WriteKey::from(ChangeId(15)), WriteKey::from(ChangeId(20)), pending]);
        assert_eq!(keys[0].change_id(), Some(ChangeId(15)));
    }

    #[test]
    fn test_confirm_at_or_below_watermark_is_ignored() {
        let mut log = OptimisticLog::new();
        assert!(!log.confirm(ChangeId(10), working(1), ChangeId(10)));
        assert!(!log.confirm(ChangeId(3), working(1), ChangeId(10)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_prune_never_touches_pending() {
        let mut log = OptimisticLog::new();
        let pending = log.insert_pending(working(1));
        log.confirm(ChangeId(11), working(2), ChangeId(10));
        log.confirm(ChangeId(12), working(3), ChangeId(10));
        log.confirm(ChangeId(14), working(4), ChangeId(10));

        assert_eq!(log.prune_through(ChangeId(12)), 2);
        let keys: Vec<WriteKey> = log.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![WriteKey::from(ChangeId(14)), pending]);

        assert_eq!(log.prune_through(ChangeId(u64::MAX)), 1);
        assert_eq!(log.pending_count(), 1);
    }

    #[test]
    fn test_remove_pending() {
        let mut log = OptimisticLog::new();
        let key = log.insert_pending(working(1));
        assert_eq!(log.get(key), Some(&working(1)));
        assert!(log.remove(key).is_some());
        assert!(log.remove(key).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(WriteKey::from(ChangeId(12)).to_string(), "@12");
        assert_eq!(WriteKey::Local(3).to_string(), "local+3");
    }

    #[test]
    fn test_huge_change_ids_never_collide_with_pending() {
        let mut log = OptimisticLog::new();
        let pending = log.insert_pending(working(1));
        let huge = ChangeId(u64::MAX - 1);
        assert!(log.confirm(huge, working(2), ChangeId(10)));
        assert_eq!(log.pending_count(), 1);
        assert_eq!(log.confirmed_count(), 1);

        // The stream echoing that change removes only the confirmed entry.
        assert!(log.remove(WriteKey::from(huge)).is_some());
        assert_eq!(log.get(pending), Some(&working(1)));

        log.confirm(ChangeId(u64::MAX), working(3), ChangeId(10));
        assert_eq!(log.prune_through(ChangeId(u64::MAX)), 1);
        assert_eq!(log.pending_count(), 1);
        assert_eq!(log.confirmed_count(), 0);
    }
}
