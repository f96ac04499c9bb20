//! # Reconciliation
//!
//! Matches server confirmations to pending predictions.
//!
//! ```text
//! confirmation(seq)
//!   │
//!   ├─ not pending / past timeout ──────────► Stale (ignored)
//!   ├─ accepted, divergence ≤ tolerance ────► WithinTolerance
//!   └─ rejected, or divergence > tolerance ─► rollback to server state
//!                                             replay pending > seq
//!                                             emit Correction
//! ```
//!
//! A rejected action without a `correctedState` rolls back to the last
//! state the server vouched for, or to the state the action was applied
//! to if the server never vouched for one.

use crate::clock::Timestamp;
use crate::events::{EventSink, StateNotification, SyncEvent};
use crate::protocol::Confirmation;
use crate::snapshot::PlayerState;

use super::InputProcessor;

/// What a confirmation led to.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconciliationOutcome {
    /// No matching pending entry, or it was past its timeout.
    Stale,
    /// Prediction held.
    WithinTolerance {
        /// Measured divergence.
        divergence: f32,
    },
    /// Rolled back and replayed.
    Corrected {
        /// Measured divergence.
        divergence: f32,
        /// Pending actions replayed on top of the server state.
        replayed: usize,
        /// Resulting predicted state.
        state: PlayerState,
    },
}

/// Reconciliation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationStats {
    /// Confirmations matched to a pending entry.
    pub confirmed: u64,
    /// Corrections emitted.
    pub corrections: u64,
    /// Confirmations ignored as stale.
    pub stale: u64,
    /// Actions the server rejected.
    pub rejected: u64,
}

/// Summed absolute positional difference, or infinity if one of the two
/// is dead and the other is not.
#[must_use]
pub fn divergence(predicted: &PlayerState, authoritative: &PlayerState) -> f32 {
    if predicted.alive != authoritative.alive {
        return f32::INFINITY;
    }
    (predicted.x - authoritative.x).abs() + (predicted.y - authoritative.y).abs()
}

/// Compares confirmations with predictions and fixes divergence.
pub struct ReconciliationEngine {
    tolerance: f32,
    pending_timeout_ms: u64,
    last_authoritative: Option<PlayerState>,
    events: EventSink,
    stats: ReconciliationStats,
}

impl ReconciliationEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(tolerance: f32, pending_timeout_ms: u64, events: EventSink) -> Self {
        Self {
            tolerance,
            pending_timeout_ms,
            last_authoritative: None,
            events,
            stats: ReconciliationStats {
                confirmed: 0,
                corrections: 0,
                stale: 0,
                rejected: 0,
            },
        }
    }

    /// Handles one confirmation.
    pub fn reconcile(
        &mut self,
        input: &mut InputProcessor,
        confirmation: &Confirmation,
        now: Timestamp,
    ) -> ReconciliationOutcome {
        let sequence_number = confirmation.sequence_number;

        let Some(entry) = input.take_pending(sequence_number) else {
            tracing::debug!(sequence_number, "confirmation for unknown or evicted action");
            self.stats.stale += 1;
            return ReconciliationOutcome::Stale;
        };
        if entry.is_expired(now, self.pending_timeout_ms) {
            tracing::debug!(sequence_number, "confirmation arrived past timeout");
            self.stats.stale += 1;
            return ReconciliationOutcome::Stale;
        }
        self.stats.confirmed += 1;

        let authoritative = match (confirmation.corrected_state, confirmation.success) {
            (Some(state), _) => state,
            (None, true) => entry.predicted,
            (None, false) => self.last_authoritative.unwrap_or(entry.base),
        };
        if confirmation.success || confirmation.corrected_state.is_some() {
            self.last_authoritative = Some(authoritative);
        }

        let divergence = divergence(&entry.predicted, &authoritative);
        if confirmation.success && divergence <= self.tolerance {
            return ReconciliationOutcome::WithinTolerance { divergence };
        }

        if !confirmation.success {
            self.stats.rejected += 1;
            tracing::info!(sequence_number, "action rejected by server");
            self.events.emit(SyncEvent::ActionRejected { sequence_number });
        }

        let (state, replayed) = input.rollback_and_replay(authoritative, sequence_number);
        self.stats.corrections += 1;
        tracing::debug!(sequence_number, divergence, replayed, "prediction corrected");
        self.events.emit(SyncEvent::Correction(StateNotification {
            sequence_number,
            state,
            timestamp: now,
        }));

        ReconciliationOutcome::Corrected {
            divergence,
            replayed,
            state,
        }
    }

    /// Last player state the server vouched for.
    #[must_use]
    pub const fn last_authoritative(&self) -> Option<&PlayerState> {
        self.last_authoritative.as_ref()
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &ReconciliationStats {
        &self.stats
    }
}
