//! Priority tiers and per-kind send policy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priority tier of an outgoing action. Lower value = more urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Priority {
    /// Sent immediately, never rate limited or batched.
    Critical = 0,
    /// Movement and other latency-sensitive input.
    High = 1,
    /// Cosmetic but time-relevant.
    Medium = 2,
    /// Everything else.
    Low = 3,
}

impl Priority {
    /// Returns true for the tier that bypasses rate limiting and batching.
    #[inline]
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as Self
    }
}

/// A priority value outside `0..=3`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid priority tier {0}, expected 0..=3")]
pub struct InvalidPriority(pub u8);

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Critical),
            1 => Ok(Self::High),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Low),
            other => Err(InvalidPriority(other)),
        }
    }
}

/// Static send policy for one action kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Priority tier.
    pub priority: Priority,
    /// Minimum interval between immediate dispatches, in milliseconds.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl KindPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(priority: Priority, min_interval_ms: u64) -> Self {
        Self {
            priority,
            min_interval_ms,
        }
    }

    /// Policy for kinds missing from the table.
    pub const UNKNOWN: Self = Self::new(Priority::Low, 0);
}

/// Lookup from action kind to [`KindPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorityTable {
    kinds: BTreeMap<String, KindPolicy>,
    fallback: KindPolicy,
}

impl PriorityTable {
    /// Creates a table with an explicit fallback for unknown kinds.
    #[must_use]
    pub fn new(kinds: BTreeMap<String, KindPolicy>, fallback: KindPolicy) -> Self {
        Self { kinds, fallback }
    }

    /// Policy of `kind`, or the fallback.
    #[must_use]
    pub fn policy(&self, kind: &str) -> KindPolicy {
        self.kinds.get(kind).copied().unwrap_or(self.fallback)
    }

    /// Priority of `kind`.
    #[inline]
    #[must_use]
    pub fn priority(&self, kind: &str) -> Priority {
        self.policy(kind).priority
    }
}

/// Built-in policies of the game's action kinds.
#[must_use]
pub fn default_kind_policies() -> BTreeMap<String, KindPolicy> {
    [
        ("placeBomb", KindPolicy::new(Priority::Critical, 0)),
        ("move", KindPolicy::new(Priority::High, 16)),
        ("stopMoving", KindPolicy::new(Priority::High, 16)),
        ("emote", KindPolicy::new(Priority::Medium, 250)),
        ("chatMessage", KindPolicy::new(Priority::Low, 1000)),
    ]
    .into_iter()
    .map(|(kind, policy)| (kind.to_owned(), policy))
    .collect()
}
