//! # Transport Layer
//!
//! Decides when each outgoing action leaves: now, in the next batch, or
//! after reconnection.
//!
//! ## Design
//!
//! ```text
//! send(action)
//!   │
//!   ├─ CRITICAL ──────────────────────────────► dispatch now
//!   ├─ interval elapsed ──► flush older batch ─► dispatch now
//!   └─ rate limited ──────► OutgoingBatch
//!                              │ full / idle 16ms / oldest 50ms
//!                              ▼
//!                         playerActionBatch (on poll)
//! ```
//!
//! - Critical actions never wait for the batch, so a critical action sent
//!   in a tick always precedes the batch flushed in that tick.
//! - Non-critical actions keep their order: one allowed through the rate
//!   limiter first flushes whatever is still batched ahead of it.
//! - A dispatch while the channel is down lands in the connection's
//!   offline queue and reports [`SendOutcome::QueuedForReconnect`].

mod batch;
mod priority;
mod rate_limit;

pub use batch::OutgoingBatch;
pub use priority::{default_kind_policies, InvalidPriority, KindPolicy, Priority, PriorityTable};
pub use rate_limit::{RateLimitEntry, RateLimiter};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::{TimerKind, TimerSet, Timestamp};
use crate::error::MessageParseError;
use crate::protocol::{ClientMessage, SequencedAction};

/// Result of handing a message to the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written to an open channel.
    Sent,
    /// Held until the channel is open again.
    Queued,
}

/// Sink for messages the transport has decided to send.
///
/// Implemented by the connection supervisor; the client wraps it to route
/// encoding through the offload executor.
pub trait Outbound {
    /// Sends or queues one message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError`] if the message cannot be encoded.
    fn dispatch(
        &mut self,
        message: ClientMessage,
        priority: Priority,
        now: Timestamp,
    ) -> Result<DispatchOutcome, MessageParseError>;
}

/// What [`SyncTransport::send`] did with an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the channel right away.
    DispatchedImmediately,
    /// Deferred into the outgoing batch.
    QueuedForBatch,
    /// Channel is down; held for flush on reconnect.
    QueuedForReconnect,
}

/// Transport configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Batch size that triggers a flush.
    pub max_batch_size: usize,
    /// Flush after this long without a new batched action.
    pub batch_idle_ms: u64,
    /// Flush once the oldest batched action has waited this long.
    pub batch_max_delay_ms: u64,
    /// Policy per action kind.
    pub kinds: BTreeMap<String, KindPolicy>,
    /// Policy of kinds missing from `kinds`.
    pub unknown_kind: KindPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            batch_idle_ms: 16,
            batch_max_delay_ms: 50,
            kinds: default_kind_policies(),
            unknown_kind: KindPolicy::UNKNOWN,
        }
    }
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Actions dispatched immediately (critical included).
    pub immediate_dispatches: u64,
    /// Critical actions dispatched.
    pub critical_dispatches: u64,
    /// Actions deferred by the rate limiter.
    pub rate_limited: u64,
    /// Batches flushed.
    pub batches_flushed: u64,
    /// Actions sent inside batches.
    pub batched_actions: u64,
    /// Dispatches that landed in the offline queue.
    pub queued_for_reconnect: u64,
}

/// Priority-, rate- and batch-aware scheduler of outgoing actions.
pub struct SyncTransport {
    config: TransportConfig,
    table: PriorityTable,
    limiter: RateLimiter,
    batch: OutgoingBatch,
    timers: TimerSet,
    stats: TransportStats,
}

impl SyncTransport {
    /// Creates a transport.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let table = PriorityTable::new(config.kinds.clone(), config.unknown_kind);
        let batch = OutgoingBatch::with_capacity(config.max_batch_size);
        Self {
            config,
            table,
            limiter: RateLimiter::new(),
            batch,
            timers: TimerSet::new(),
            stats: TransportStats::default(),
        }
    }

    /// Schedules one action.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError`] only if an immediate dispatch could
    /// not be encoded. Rate-limit deferral is not an error.
    pub fn send<O: Outbound>(
        &mut self,
        out: &mut O,
        action: SequencedAction,
        now: Timestamp,
    ) -> Result<SendOutcome, MessageParseError> {
        let kind = action.action.kind();
        let policy = self.table.policy(kind);

        if !policy.priority.is_critical() && !self.limiter.allows(kind, now) {
            self.enqueue(action, policy.priority, now);
            self.stats.rate_limited += 1;
            tracing::trace!(kind, "rate limited, deferred to batch");
            return Ok(SendOutcome::QueuedForBatch);
        }

        if !policy.priority.is_critical() && !self.batch.is_empty() {
            self.flush(out, now)?;
        }

        let message = ClientMessage::PlayerAction {
            action,
            timestamp: now,
            priority: policy.priority,
        };
        let outcome = out.dispatch(message, policy.priority, now)?;

        if !policy.priority.is_critical() {
            self.limiter.record(kind, policy.min_interval_ms, now);
        } else {
            self.stats.critical_dispatches += 1;
        }
        self.stats.immediate_dispatches += 1;

        Ok(match outcome {
            DispatchOutcome::Sent => SendOutcome::DispatchedImmediately,
            DispatchOutcome::Queued => {
                self.stats.queued_for_reconnect += 1;
                SendOutcome::QueuedForReconnect
            }
        })
    }

    fn enqueue(&mut self, action: SequencedAction, priority: Priority, now: Timestamp) {
        if self.batch.is_empty() {
            self.timers
                .schedule(TimerKind::BatchMaxDelay, now + self.config.batch_max_delay_ms);
        }
        self.batch.push(action, priority, now);

        let idle_at = if self.batch.len() >= self.config.max_batch_size {
            now
        } else {
            now + self.config.batch_idle_ms
        };
        self.timers.schedule(TimerKind::BatchIdle, idle_at);
    }

    /// Returns true if a flush trigger has fired.
    #[must_use]
    pub fn batch_due(&self, now: Timestamp) -> bool {
        !self.batch.is_empty()
            && (self.timers.is_due(TimerKind::BatchIdle, now)
                || self.timers.is_due(TimerKind::BatchMaxDelay, now))
    }

    fn take_batch(&mut self, now: Timestamp) -> Option<(ClientMessage, Priority)> {
        self.timers.cancel(TimerKind::BatchIdle);
        self.timers.cancel(TimerKind::BatchMaxDelay);
        if self.batch.is_empty() {
            return None;
        }

        let (actions, priority) = self.batch.drain();
        self.stats.batches_flushed += 1;
        self.stats.batched_actions += actions.len() as u64;
        tracing::debug!(count = actions.len(), %priority, "flushing action batch");

        Some((
            ClientMessage::PlayerActionBatch {
                actions,
                timestamp: now,
            },
            priority,
        ))
    }

    /// Flushes the batch if due.
    ///
    /// # Errors
    ///
    /// Returns [`MessageParseError`] if the batch could not be encoded.
    pub fn poll<O: Outbound>(
        &mut self,
        out: &mut O,
        now: Timestamp,
    ) -> Result<Option<SendOutcome>, MessageParseError> {
        if self.batch_due(now) {
            self.flush(out, now)
        } else {
            Ok(None)
        }
    }

    fn flush<O: Outbound>(
        &mut self,
        out: &mut O,
        now: Timestamp,
    ) -> Result<Option<SendOutcome>, MessageParseError> {
        let Some((message, priority)) = self.take_batch(now) else {
            return Ok(None);
        };
        Ok(Some(match out.dispatch(message, priority, now)? {
            DispatchOutcome::Sent => SendOutcome::DispatchedImmediately,
            DispatchOutcome::Queued => {
                self.stats.queued_for_reconnect += 1;
                SendOutcome::QueuedForReconnect
            }
        }))
    }

    /// Earliest batch deadline, for event loops that sleep until work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Currently batched actions.
    #[must_use]
    pub fn pending_batch(&self) -> &[SequencedAction] {
        self.batch.actions()
    }

    /// Rate-limit history.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Drops the batch, its timers and the rate-limit history.
    pub fn clear(&mut self) {
        self.timers.cancel_all();
        let (dropped, _) = self.batch.drain();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "discarded unsent batch");
        }
        self.limiter.clear();
    }
}
