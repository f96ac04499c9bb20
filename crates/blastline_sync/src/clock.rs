//! # Clock and Timers
//!
//! Every time-dependent decision in this crate reads the time from an
//! injected [`Clock`] and schedules work as deadlines in a [`TimerSet`].
//! Nothing sleeps and nothing spawns a timer thread: the owner calls
//! `poll(now)` from its event loop and due deadlines fire there.
//!
//! ```text
//! event loop ──► clock.now() ──► component.poll(now)
//!                                   │
//!                                   ├─ Heartbeat due?      → send ping
//!                                   ├─ HeartbeatTimeout?   → force close
//!                                   ├─ Reconnect due?      → reopen channel
//!                                   └─ BatchIdle/MaxDelay? → flush batch
//! ```
//!
//! Tests drive a [`ManualClock`] and advance virtual time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds. Wire timestamps use the same unit.
pub type Timestamp = u64;

/// Source of the current time.
pub trait Clock {
    /// Returns the current time in milliseconds.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall-clock anchored, monotonic clock.
///
/// The epoch offset is sampled once; after that time only moves forward
/// with [`Instant`], so a system clock adjustment cannot reorder timers.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
    epoch_ms: Timestamp,
}

impl SystemClock {
    /// Creates a clock anchored at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as Timestamp);
        Self {
            origin: Instant::now(),
            epoch_ms,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.epoch_ms + self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Virtual clock advanced by hand.
///
/// Clones share the same time, so a test can keep one handle while the
/// client owns another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock starting at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Moves time forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jumps to an absolute time.
    pub fn set(&self, at: Timestamp) {
        self.now.store(at, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Named timers used by the synchronization core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TimerKind {
    /// Next ping is due.
    Heartbeat = 0,
    /// Oldest unanswered ping has gone stale.
    HeartbeatTimeout = 1,
    /// Batch has been idle long enough to flush.
    BatchIdle = 2,
    /// Oldest batched item has waited the maximum delay.
    BatchMaxDelay = 3,
    /// Reconnection delay has elapsed.
    Reconnect = 4,
    /// Open handshake has taken too long.
    ConnectTimeout = 5,
}

impl TimerKind {
    const COUNT: usize = 6;
}

/// One optional deadline per [`TimerKind`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerSet {
    deadlines: [Option<Timestamp>; TimerKind::COUNT],
}

impl TimerSet {
    /// Creates an empty timer set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            deadlines: [None; TimerKind::COUNT],
        }
    }

    /// Arms `kind` to fire at `at`, replacing any previous deadline.
    #[inline]
    pub fn schedule(&mut self, kind: TimerKind, at: Timestamp) {
        self.deadlines[kind as usize] = Some(at);
    }

    /// Arms `kind` only if it is not already armed.
    #[inline]
    pub fn schedule_if_idle(&mut self, kind: TimerKind, at: Timestamp) {
        let slot = &mut self.deadlines[kind as usize];
        if slot.is_none() {
            *slot = Some(at);
        }
    }

    /// Disarms `kind`.
    #[inline]
    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind as usize] = None;
    }

    /// Disarms every timer.
    pub fn cancel_all(&mut self) {
        self.deadlines = [None; TimerKind::COUNT];
    }

    /// Returns the deadline for `kind`, if armed.
    #[inline]
    #[must_use]
    pub const fn deadline(&self, kind: TimerKind) -> Option<Timestamp> {
        self.deadlines[kind as usize]
    }

    /// Returns true if `kind` is armed and its deadline has passed.
    #[inline]
    #[must_use]
    pub fn is_due(&self, kind: TimerKind, now: Timestamp) -> bool {
        self.deadlines[kind as usize].is_some_and(|at| now >= at)
    }

    /// Disarms and reports `kind` if it is due.
    pub fn take_due(&mut self, kind: TimerKind, now: Timestamp) -> bool {
        if self.is_due(kind, now) {
            self.cancel(kind);
            true
        } else {
            false
        }
    }

    /// Earliest armed deadline across all timers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.iter().flatten().min().copied()
    }
}
