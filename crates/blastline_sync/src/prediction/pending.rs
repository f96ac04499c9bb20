//! Predicted actions awaiting confirmation.

use std::collections::HashMap;

use crate::clock::Timestamp;
use crate::protocol::PlayerAction;
use crate::snapshot::PlayerState;

/// A locally applied action.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictedAction {
    /// Sequence number.
    pub sequence_number: u64,
    /// The action.
    pub action: PlayerAction,
    /// Local time it was applied.
    pub issued_at: Timestamp,
}

/// Pending action plus the states around it.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEntry {
    /// The action.
    pub action: PredictedAction,
    /// Player state the action was applied to.
    pub base: PlayerState,
    /// Player state the action produced.
    pub predicted: PlayerState,
}

impl PendingEntry {
    /// Returns true once the entry is older than `timeout_ms` at `now`.
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: Timestamp, timeout_ms: u64) -> bool {
        now.saturating_sub(self.action.issued_at) > timeout_ms
    }
}

/// Pending entries keyed by sequence number.
///
/// Every entry leaves on confirmation or timeout eviction.
#[derive(Clone, Debug, Default)]
pub struct PendingActionTable {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingActionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, replacing one with the same sequence number.
    pub fn insert(&mut self, entry: PendingEntry) {
        self.entries.insert(entry.action.sequence_number, entry);
    }

    /// Removes and returns an entry.
    pub fn remove(&mut self, sequence_number: u64) -> Option<PendingEntry> {
        self.entries.remove(&sequence_number)
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, sequence_number: u64) -> Option<&PendingEntry> {
        self.entries.get(&sequence_number)
    }

    /// Looks up an entry mutably.
    pub fn get_mut(&mut self, sequence_number: u64) -> Option<&mut PendingEntry> {
        self.entries.get_mut(&sequence_number)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence numbers greater than `after`, ascending.
    #[must_use]
    pub fn sequences_after(&self, after: u64) -> Vec<u64> {
        let mut sequences: Vec<u64> = self.entries.keys().copied().filter(|&s| s > after).collect();
        sequences.sort_unstable();
        sequences
    }

    /// Drops entries older than `timeout_ms`; returns how many.
    pub fn evict_expired(&mut self, now: Timestamp, timeout_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, timeout_ms));
        before - self.entries.len()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, issued_at: Timestamp) -> PendingEntry {
        let state = PlayerState::spawn(0.0, 0.0);
        PendingEntry {
            action: PredictedAction {
                sequence_number: seq,
                action: PlayerAction::StopMoving,
                issued_at,
            },
            base: state,
            predicted: state,
        }
    }

    #[test]
    fn test_sequences_after_sorted() {
        let mut table = PendingActionTable::new();
        for seq in [5, 2, 9, 7] {
            table.insert(entry(seq, 0));
        }
        assert_eq!(table.sequences_after(4), vec![5, 7, 9]);
        assert!(table.sequences_after(9).is_empty());
    }

    #[test]
    fn test_evict_expired() {
        let mut table = PendingActionTable::new();
        table.insert(entry(1, 0));
        table.insert(entry(2, 500));

        // Exactly at the timeout is still alive
        assert_eq!(table.evict_expired(1000, 1000), 0);
        assert_eq!(table.evict_expired(1001, 1000), 1);
        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
    }
}
