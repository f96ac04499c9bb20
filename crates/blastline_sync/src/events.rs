//! # Sync Events
//!
//! Notifications for the presentation layer and the session owner.
//!
//! Components receive an [`EventSink`] at construction and push events
//! into it; the owner drains the paired receiver from its own loop. There
//! is no global bus: whoever holds the receiver sees every event, in
//! emission order.

use crossbeam_channel::{Receiver, Sender};

use crate::clock::Timestamp;
use crate::connection::ConnectionState;
use crate::snapshot::{PlayerState, StateSnapshot};

/// Local player state tied to the action that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct StateNotification {
    /// Sequence number of the action.
    pub sequence_number: u64,
    /// Player state after the action.
    pub state: PlayerState,
    /// Time of the notification.
    pub timestamp: Timestamp,
}

/// Everything the synchronization core reports outward.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A local action was applied speculatively.
    Predicted(StateNotification),
    /// Prediction diverged; interpolate toward this state.
    Correction(StateNotification),
    /// Connection state machine moved.
    ConnectionStateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A reconnection attempt has been scheduled.
    ReconnectScheduled {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay_ms: u64,
    },
    /// Reconnection gave up. User-visible.
    ConnectionFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// New round-trip measurement.
    LatencyUpdated {
        /// Round trip in milliseconds.
        latency_ms: u64,
    },
    /// A `gameState` frame was applied.
    StateReplicated(StateSnapshot),
    /// A delta could not be applied and a full snapshot was requested.
    FullStateRequested {
        /// Consecutive rejected deltas so far.
        desync_count: u32,
    },
    /// Full-snapshot requests keep failing. User-visible.
    PersistentDesync {
        /// Consecutive rejected deltas.
        attempts: u32,
    },
    /// The server rejected a predicted action.
    ActionRejected {
        /// Sequence number of the action.
        sequence_number: u64,
    },
}

impl SyncEvent {
    /// Returns true for events meant for the user rather than the renderer.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::PersistentDesync { .. })
    }
}

/// Sending half of the event stream.
///
/// Cloning shares the same stream. A sink without a receiver, or whose
/// receiver was dropped, discards events silently.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<Sender<SyncEvent>>,
}

impl EventSink {
    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(tx: Sender<SyncEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Creates a sink and its receiver.
    #[must_use]
    pub fn channel() -> (Self, Receiver<SyncEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    /// A sink that drops everything.
    #[must_use]
    pub const fn discard() -> Self {
        Self { tx: None }
    }

    /// Pushes an event.
    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            if event.is_fatal() {
                tracing::error!(?event, "fatal sync event");
            }
            // Receiver gone: nobody is listening any more
            let _ = tx.send(event);
        }
    }
}
