//! # Loopback Simulation
//!
//! An in-memory [`Channel`](crate::connection::Channel) and a small
//! authoritative server, so whole sessions run in one thread against a
//! [`ManualClock`](crate::clock::ManualClock).
//!
//! ## Modules
//!
//! - `loopback`: the channel pair and its scripting handle
//! - `authority`: the server that answers on the far end

mod authority;
mod loopback;

pub use authority::{AuthoritativeSim, SimStats, BOMB_FUSE_MS, EXPLOSION_MS};
pub use loopback::{LoopbackChannel, LoopbackHandle};

use serde::{Deserialize, Serialize};

/// Link and server behavior for a simulated session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// One-way delay on server-to-client messages.
    pub latency_ms: u64,
    /// Horizontal offset the server adds to some confirmed moves.
    pub drift: f32,
    /// Every `drift_every`-th sequence number drifts; 0 disables drift.
    pub drift_every: u64,
}

impl NetworkConditions {
    /// Same machine, server agrees with every prediction.
    pub const PERFECT: Self = Self {
        latency_ms: 0,
        drift: 0.0,
        drift_every: 0,
    };

    /// Fiber, server agrees with every prediction.
    pub const GOOD: Self = Self {
        latency_ms: 30,
        drift: 0.0,
        drift_every: 0,
    };

    /// Cable, with the server correcting every fourth action by a full tile.
    pub const DRIFTING: Self = Self {
        latency_ms: 60,
        drift: 1.0,
        drift_every: 4,
    };

    /// Mobile, with slight corrections that stay under the default tolerance.
    pub const JITTERY: Self = Self {
        latency_ms: 120,
        drift: 0.25,
        drift_every: 3,
    };
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self::GOOD
    }
}
