//! # Wire Protocol
//!
//! JSON text frames exchanged over the duplex channel.
//!
//! ## Frame Envelope
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ { "type": <kind>, "timestamp": <ms>, ...kind-specific... }   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Layout
//!
//! - `messages`: one enum per direction, one variant per frame type
//! - `serialization`: text frame ↔ message, with typed parse errors
//! - `compression`: snapshot deltas and the per-direction codec

mod compression;
mod messages;
mod serialization;

pub use compression::{
    compress, decompress, CodecConfig, DeltaCodec, DeltaPatch, EntityOp, KindOps,
};
pub use messages::{
    ClientMessage, CompressionType, Confirmation, GameStateFrame, GameStatePayload, PlayerAction,
    SequencedAction, ServerMessage,
};
pub use serialization::{decode_client, decode_server, encode_client, encode_server};
