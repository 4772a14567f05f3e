//! Bounded replay log of recent authoritative events.
//!
//! The agent appends every sync event it receives and replays the whole
//! buffer to each newly attached tab, which then discards whatever it already
//! has. The newest entry is also the resume point for reconnects.

use std::collections::VecDeque;

use huntsync_types::{ChangeId, SyncEvent};

use crate::constants::REWIND_CAPACITY;

/// Fixed-capacity FIFO of [`SyncEvent`]s, oldest first.
#[derive(Debug, Clone)]
pub struct RewindBuffer {
    events: VecDeque<SyncEvent>,
    capacity: usize,
}

impl Default for RewindBuffer {
    fn default() -> Self {
        Self::with_capacity(REWIND_CAPACITY)
    }
}

impl RewindBuffer {
    /// A buffer retaining at most `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append an event, returning the evicted oldest entry if the buffer was full.
    pub fn push(&mut self, event: SyncEvent) -> Option<SyncEvent> {
        let evicted = if self.events.len() == self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Events in delivery order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &SyncEvent> + '_ {
        self.events.iter()
    }

    /// Resume point for the next connection attempt.
    pub fn last_change_id(&self) -> Option<ChangeId> {
        self.events.back().map(|e| e.change_id)
    }

    pub fn oldest_change_id(&self) -> Option<ChangeId> {
        self.events.front().map(|e| e.change_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntsync_types::{Change, PuzzleId};

    fn delete_event(change_id: u64) -> SyncEvent {
        SyncEvent {
            change_id: ChangeId(change_id),
            change: Change::DeletePuzzle(PuzzleId(change_id as i64)),
        }
    }

    #[test]
    fn test_empty_buffer() {
        let buf = RewindBuffer::default();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), REWIND_CAPACITY);
        assert_eq!(buf.last_change_id(), None);
        assert_eq!(buf.oldest_change_id(), None);
    }

    #[test]
    fn test_push_preserves_order() {
        let mut buf = RewindBuffer::with_capacity(4);
        for id in [3, 5, 8] {
            assert!(buf.push(delete_event(id)).is_none());
        }
        let ids: Vec<u64> = buf.iter().map(|e| e.change_id.get()).collect();
        assert_eq!(ids, vec![3, 5, 8]);
        assert_eq!(buf.last_change_id(), Some(ChangeId(8)));
        assert_eq!(buf.oldest_change_id(), Some(ChangeId(3)));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buf = RewindBuffer::with_capacity(3);
        for id in 1..=3 {
            buf.push(delete_event(id));
        }
        let evicted = buf.push(delete_event(4));
        assert_eq!(evicted.map(|e| e.change_id), Some(ChangeId(1)));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.oldest_change_id(), Some(ChangeId(2)));
        assert_eq!(buf.last_change_id(), Some(ChangeId(4)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buf = RewindBuffer::with_capacity(0);
        buf.push(delete_event(1));
        buf.push(delete_event(2));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.last_change_id(), Some(ChangeId(2)));
    }

    #[test]
    fn test_clear() {
        let mut buf = RewindBuffer::with_capacity(2);
        buf.push(delete_event(1));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.last_change_id(), None);
    }
}
