//! Short ring of recent predictions.

use std::collections::VecDeque;

use crate::clock::Timestamp;
use crate::protocol::PlayerAction;
use crate::snapshot::PlayerState;

/// One recorded prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// Sequence number.
    pub sequence_number: u64,
    /// The action.
    pub action: PlayerAction,
    /// Local time it was applied.
    pub issued_at: Timestamp,
    /// Predicted player state right after the action.
    pub predicted: PlayerState,
}

/// Predictions from the last `window_ms`, capped at `capacity` entries.
#[derive(Clone, Debug)]
pub struct InputHistory {
    entries: VecDeque<HistoryEntry>,
    window_ms: u64,
    capacity: usize,
}

impl InputHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            window_ms,
            capacity,
        }
    }

    /// Appends an entry and drops whatever fell out of the window.
    pub fn record(&mut self, entry: HistoryEntry) {
        let now = entry.issued_at;
        self.entries.push_back(entry);
        self.prune(now);
    }

    /// Drops entries older than the window at `now`.
    pub fn prune(&mut self, now: Timestamp) {
        while self
            .entries
            .front()
            .is_some_and(|e| now.saturating_sub(e.issued_at) > self.window_ms)
        {
            self.entries.pop_front();
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Entries with a sequence number greater than `after`.
    pub fn since(&self, after: u64) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(move |e| e.sequence_number > after)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, issued_at: Timestamp) -> HistoryEntry {
        HistoryEntry {
            sequence_number: seq,
            action: PlayerAction::PlaceBomb,
            issued_at,
            predicted: PlayerState::default(),
        }
    }

    #[test]
    fn test_window_drops_old() {
        let mut history = InputHistory::new(500, 64);
        history.record(entry(1, 0));
        history.record(entry(2, 300));
        history.record(entry(3, 600));

        let kept: Vec<_> = history.iter().map(|e| e.sequence_number).collect();
        assert_eq!(kept, vec![2, 3]);
        assert_eq!(history.since(2).count(), 1);
    }

    #[test]
    fn test_capacity_cap() {
        let mut history = InputHistory::new(10_000, 3);
        for seq in 1..=5 {
            history.record(entry(seq, seq));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next().map(|e| e.sequence_number), Some(3));
    }
}
