//! # Blastline Sync - Client Synchronization Core
//!
//! Keeps a real-time client responsive to local input while converging on
//! the state of an authoritative server reached over a lossy, latent
//! duplex channel.
//!
//! ## Architecture
//!
//! - **Connection**: channel lifecycle, heartbeat, bounded reconnection
//! - **Transport**: priority tiers, per-kind rate limits, batching
//! - **Prediction**: sequence-numbered local actions applied before any round trip
//! - **Reconciliation**: rollback + replay when the server disagrees
//! - **Replication**: per-entity, per-field delta compression of world snapshots
//!
//! ## Data Flow
//!
//! ```text
//! CLIENT                                       SERVER
//!   |                                             |
//!   |-- playerAction {seq: 7} ------------------->|
//!   |   (already applied locally)                 | <- applies seq 7
//!   |                                             |
//!   |<-- actionConfirmation {seq: 7, state} ------|
//!   |    diverged? rollback to state,             |
//!   |    replay seq 8.. on top                    |
//!   |                                             |
//!   |<-- gameState {delta} -----------------------|
//!   |    apply to receive baseline                |
//! ```
//!
//! The server always wins; the client only guesses early.
//!
//! ## Example
//!
//! ```rust,ignore
//! use blastline_sync::{EventSink, SyncClient, SyncConfig, SystemClock};
//!
//! let (events, rx) = EventSink::channel();
//! let mut client = SyncClient::new(SyncConfig::default(), channel, SystemClock::new(), events, spawn)?;
//! client.connect();
//! loop {
//!     client.poll()?;
//!     for event in rx.try_iter() { /* render */ }
//! }
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod offload;
pub mod prediction;
pub mod protocol;
pub mod simulation;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientStats, InputOutcome, SyncClient};
pub use clock::{Clock, ManualClock, SystemClock, TimerKind, TimerSet, Timestamp};
pub use config::SyncConfig;
pub use connection::{
    Channel, ChannelEvent, CloseCode, ConnectionConfig, ConnectionState, ConnectionSupervisor,
};
pub use error::{
    ConfigError, ConnectionError, DeltaApplyError, MessageParseError, OffloadDispatchError,
    SyncError, SyncResult,
};
pub use events::{EventSink, StateNotification, SyncEvent};
pub use offload::{InlineOffload, OffloadExecutor, Offloader, WorkerOffload};
pub use prediction::{
    apply_action, InputProcessor, MovementRules, PredictionConfig, ReconciliationEngine,
    ReconciliationOutcome,
};
pub use protocol::{
    ClientMessage, CodecConfig, Confirmation, DeltaCodec, DeltaPatch, PlayerAction, ServerMessage,
};
pub use simulation::{AuthoritativeSim, LoopbackChannel, LoopbackHandle, NetworkConditions};
pub use snapshot::{
    BombState, Direction, EntityArena, EntityId, EntityKind, ExplosionState, PlayerState,
    StateSnapshot,
};
pub use transport::{Priority, SendOutcome, SyncTransport, TransportConfig};
