//! Per-kind minimum interval between immediate dispatches.

use std::collections::HashMap;

use crate::clock::Timestamp;

/// Send history of one action kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Time of the last immediate dispatch.
    pub last_sent_at: Timestamp,
    /// Minimum gap between immediate dispatches.
    pub min_interval_ms: u64,
}

impl RateLimitEntry {
    /// Returns true if a dispatch at `now` respects the interval.
    #[inline]
    #[must_use]
    pub const fn allows(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.last_sent_at) >= self.min_interval_ms
    }
}

/// Tracks [`RateLimitEntry`] per action kind.
///
/// A kind that has never been dispatched is always allowed.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    entries: HashMap<&'static str, RateLimitEntry>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `kind` may be dispatched at `now`.
    #[must_use]
    pub fn allows(&self, kind: &str, now: Timestamp) -> bool {
        self.entries.get(kind).map_or(true, |entry| entry.allows(now))
    }

    /// Records an immediate dispatch of `kind`.
    pub fn record(&mut self, kind: &'static str, min_interval_ms: u64, now: Timestamp) {
        self.entries.insert(
            kind,
            RateLimitEntry {
                last_sent_at: now,
                min_interval_ms,
            },
        );
    }

    /// Entry of `kind`, if it was ever dispatched.
    #[must_use]
    pub fn entry(&self, kind: &str) -> Option<&RateLimitEntry> {
        self.entries.get(kind)
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
