//! # Sync Error Types
//!
//! All errors that can occur in the synchronization core.
//!
//! Almost every condition here is recovered locally: the channel
//! reconnects, a bad frame is dropped, a codec desync requests a full
//! snapshot, an unavailable offload worker falls back to inline work.
//! Only [`SyncError::ConnectionExhausted`] and
//! [`SyncError::PersistentDesync`] are meant for the user.

use thiserror::Error;

use crate::snapshot::{EntityId, EntityKind};

/// Failure of the duplex channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The channel could not be opened.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// An operation needed an open channel.
    #[error("channel is not connected")]
    NotConnected,

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Malformed or unencodable frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageParseError {
    /// JSON could not be decoded into a known message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A message could not be encoded.
    #[error("failed to encode {kind}: {reason}")]
    Encode {
        /// Message type being encoded.
        kind: &'static str,
        /// Encoder error.
        reason: String,
    },
}

/// Operation of a delta patch entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaOpKind {
    /// Entity added.
    New,
    /// Entity fields changed.
    Update,
    /// Entity removed.
    Removed,
}

impl std::fmt::Display for DeltaOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Removed => "removed",
        })
    }
}

/// A delta patch could not be applied to the local baseline.
///
/// The codec is out of sync; the cure is a full snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeltaApplyError {
    /// Patch references an entity the baseline does not have.
    #[error("{op} op references unknown {kind} entity {id}")]
    UnknownEntity {
        /// Entity kind.
        kind: EntityKind,
        /// Missing entity id.
        id: EntityId,
        /// Offending operation.
        op: DeltaOpKind,
    },

    /// A delta arrived before any full snapshot.
    #[error("delta received without a receive baseline")]
    NoBaseline,

    /// A delta arrived while a full snapshot is still outstanding.
    #[error("delta dropped while awaiting a full snapshot")]
    AwaitingFullSnapshot,
}

/// The offload executor could not take a job.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadDispatchError {
    /// No executor is attached.
    #[error("offload executor unavailable")]
    Unavailable,

    /// The executor's queue has been closed.
    #[error("offload executor disconnected")]
    Disconnected,
}

/// Invalid configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML document did not parse.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error of the synchronization core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Channel failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Frame failure.
    #[error(transparent)]
    Parse(#[from] MessageParseError),

    /// Codec desync.
    #[error(transparent)]
    Delta(#[from] DeltaApplyError),

    /// Offload failure.
    #[error(transparent)]
    Offload(#[from] OffloadDispatchError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every reconnection attempt failed.
    #[error("connection failed after {attempts} reconnection attempts")]
    ConnectionExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Full-snapshot requests did not restore the codec.
    #[error("state replication still out of sync after {attempts} full-snapshot requests")]
    PersistentDesync {
        /// Requests made.
        attempts: u32,
    },
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
