//! # Client-Side Prediction
//!
//! Apply local input immediately, keep what is needed to fix it later.
//!
//! ## How It Works
//!
//! 1. Input arrives, gets the next sequence number
//! 2. [`apply_action`] runs on the predicted state right away
//! 3. The action is remembered as pending until the server answers
//! 4. On a divergent answer, the engine in [`reconciliation`] rolls back
//!    to the server's state and replays the still-pending actions
//!
//! ```text
//! Input:      [1] [2] [3] [4] [5]
//!              │   │   │   │   │
//! Prediction: [P1][P2][P3][P4][P5]
//!                  │
//! Server Ack:     [S2]────────────
//!                  │
//! Reconcile:  Compare P2 with S2
//!             If different: replay [3,4,5] from S2
//! ```

mod history;
mod movement;
mod pending;
pub mod reconciliation;

pub use history::{HistoryEntry, InputHistory};
pub use movement::{apply_action, replay, MovementRules};
pub use pending::{PendingActionTable, PendingEntry, PredictedAction};
pub use reconciliation::{ReconciliationEngine, ReconciliationOutcome, ReconciliationStats};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::events::{EventSink, StateNotification, SyncEvent};
use crate::protocol::{PlayerAction, SequencedAction};
use crate::snapshot::PlayerState;

/// Prediction configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Pending actions older than this are dropped unconfirmed.
    pub pending_timeout_ms: u64,
    /// Span of the prediction history.
    pub history_window_ms: u64,
    /// Hard cap on history entries.
    pub history_capacity: usize,
    /// Divergence at or below this needs no correction.
    pub divergence_tolerance: f32,
    /// Movement rules shared with replay.
    pub movement: MovementRules,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: 1000,
            history_window_ms: 500,
            history_capacity: 256,
            divergence_tolerance: 0.5,
            movement: MovementRules::default(),
        }
    }
}

/// Speculative executor of local input.
pub struct InputProcessor {
    config: PredictionConfig,
    counter: u64,
    predicted: PlayerState,
    pending: PendingActionTable,
    history: InputHistory,
    events: EventSink,
}

impl InputProcessor {
    /// Creates a processor predicting from `initial`.
    #[must_use]
    pub fn new(config: PredictionConfig, initial: PlayerState, events: EventSink) -> Self {
        let history = InputHistory::new(config.history_window_ms, config.history_capacity);
        Self {
            config,
            counter: 0,
            predicted: initial,
            pending: PendingActionTable::new(),
            history,
            events,
        }
    }

    /// Numbers, applies and records one local action.
    ///
    /// Emits [`SyncEvent::Predicted`] and returns the action ready for the
    /// transport.
    pub fn process(&mut self, action: PlayerAction, now: Timestamp) -> SequencedAction {
        self.counter += 1;
        let sequence_number = self.counter;

        let base = self.predicted;
        let predicted = apply_action(&base, &action, &self.config.movement);
        self.predicted = predicted;

        self.pending.insert(PendingEntry {
            action: PredictedAction {
                sequence_number,
                action: action.clone(),
                issued_at: now,
            },
            base,
            predicted,
        });
        self.history.record(HistoryEntry {
            sequence_number,
            action: action.clone(),
            issued_at: now,
            predicted,
        });

        tracing::trace!(sequence_number, kind = action.kind(), "predicted");
        self.events.emit(SyncEvent::Predicted(StateNotification {
            sequence_number,
            state: predicted,
            timestamp: now,
        }));

        SequencedAction {
            sequence_number,
            action,
        }
    }

    /// Resets to `authoritative` and replays every pending action after
    /// `confirmed`, in sequence order.
    ///
    /// Each replayed entry is rebased so a later confirmation compares
    /// against the corrected prediction. Returns the final state and the
    /// number of replayed actions.
    pub fn rollback_and_replay(
        &mut self,
        authoritative: PlayerState,
        confirmed: u64,
    ) -> (PlayerState, usize) {
        let sequences = self.pending.sequences_after(confirmed);
        let mut state = authoritative;

        for &sequence in &sequences {
            if let Some(entry) = self.pending.get_mut(sequence) {
                entry.base = state;
                state = apply_action(&state, &entry.action.action, &self.config.movement);
                entry.predicted = state;
            }
        }

        self.predicted = state;
        (state, sequences.len())
    }

    /// Removes a pending entry.
    pub fn take_pending(&mut self, sequence_number: u64) -> Option<PendingEntry> {
        self.pending.remove(sequence_number)
    }

    /// Drops pending actions past the timeout; returns how many.
    pub fn evict_expired(&mut self, now: Timestamp) -> usize {
        self.history.prune(now);
        let evicted = self.pending.evict_expired(now, self.config.pending_timeout_ms);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted unconfirmed predictions");
        }
        evicted
    }

    /// Forgets all predictions and restarts from `state`.
    ///
    /// The sequence counter keeps counting.
    pub fn reset(&mut self, state: PlayerState) {
        self.pending.clear();
        self.history.clear();
        self.predicted = state;
    }

    /// Current predicted player state.
    #[must_use]
    pub const fn predicted_state(&self) -> &PlayerState {
        &self.predicted
    }

    /// Pending actions.
    #[must_use]
    pub const fn pending(&self) -> &PendingActionTable {
        &self.pending
    }

    /// Recent predictions.
    #[must_use]
    pub const fn history(&self) -> &InputHistory {
        &self.history
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &PredictionConfig {
        &self.config
    }
}
