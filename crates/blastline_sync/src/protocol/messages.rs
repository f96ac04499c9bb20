//! # Message Definitions
//!
//! Every frame on the wire is a JSON object tagged by `type` and stamped
//! with a millisecond `timestamp`. Each message kind is one enum variant,
//! matched exhaustively on both sides.
//!
//! ```text
//! client → server                     server → client
//! ───────────────                     ───────────────
//! ping                                pong
//! playerAction      (one action)      gameState (full | delta)
//! playerActionBatch (many actions)    actionConfirmation
//! requestFullState
//! ```

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::clock::Timestamp;
use crate::protocol::compression::DeltaPatch;
use crate::snapshot::{Direction, PlayerState, StateSnapshot};
use crate::transport::Priority;

/// A discrete local input.
///
/// Gameplay details (speed, bomb power) are the server's business; the
/// client only needs enough to predict movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerAction {
    /// Step one cell in a direction.
    Move {
        /// Direction of travel.
        direction: Direction,
    },
    /// Stop walking.
    StopMoving,
    /// Drop a bomb at the current cell.
    PlaceBomb,
    /// Send a chat line.
    ChatMessage {
        /// Message text.
        text: String,
    },
    /// Play an emote.
    Emote {
        /// Emote name.
        name: String,
    },
}

impl PlayerAction {
    /// Wire name of the action kind; keys the priority and rate-limit tables.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::StopMoving => "stopMoving",
            Self::PlaceBomb => "placeBomb",
            Self::ChatMessage { .. } => "chatMessage",
            Self::Emote { .. } => "emote",
        }
    }
}

/// An action stamped with its prediction sequence number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedAction {
    /// Strictly increasing, never reused.
    pub sequence_number: u64,
    /// The action itself, flattened next to the sequence number.
    #[serde(flatten)]
    pub action: PlayerAction,
}

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Heartbeat request.
    Ping {
        /// Send time.
        timestamp: Timestamp,
    },
    /// One action dispatched on its own.
    PlayerAction {
        /// The action.
        action: SequencedAction,
        /// Send time.
        timestamp: Timestamp,
        /// Priority tier of the action kind.
        priority: Priority,
    },
    /// Several deferred actions in enqueue order.
    PlayerActionBatch {
        /// The actions.
        actions: Vec<SequencedAction>,
        /// Flush time.
        timestamp: Timestamp,
    },
    /// Ask for a full snapshot after a codec desync.
    RequestFullState {
        /// Send time.
        timestamp: Timestamp,
    },
}

impl ClientMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::PlayerAction { .. } => "playerAction",
            Self::PlayerActionBatch { .. } => "playerActionBatch",
            Self::RequestFullState { .. } => "requestFullState",
        }
    }
}

/// Server verdict on one predicted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    /// Sequence number being confirmed.
    pub sequence_number: u64,
    /// Whether the server accepted the action.
    pub success: bool,
    /// Authoritative player state after the action, if the server sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_state: Option<PlayerState>,
}

/// How a `gameState` frame encodes its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// `data` is a complete snapshot.
    Full,
    /// `data` is a patch against the previous snapshot.
    Delta,
}

/// Decoded `data` of a `gameState` frame.
#[derive(Clone, Debug, PartialEq)]
pub enum GameStatePayload {
    /// Complete snapshot; replaces the receive baseline.
    Full(StateSnapshot),
    /// Patch against the receive baseline.
    Delta(DeltaPatch),
}

impl GameStatePayload {
    /// Compression tag for this payload.
    #[must_use]
    pub const fn compression(&self) -> CompressionType {
        match self {
            Self::Full(_) => CompressionType::Full,
            Self::Delta(_) => CompressionType::Delta,
        }
    }
}

/// `gameState` frame body: `{ compressionType, data, timestamp }`.
///
/// The shape of `data` depends on `compressionType`, so decoding goes
/// through [`RawGameState`] and picks the payload type from the tag.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawGameState")]
pub struct GameStateFrame {
    /// Decoded data.
    pub payload: GameStatePayload,
    /// Server send time.
    pub timestamp: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGameState {
    compression_type: CompressionType,
    data: serde_json::Value,
    #[serde(default)]
    timestamp: Timestamp,
}

impl TryFrom<RawGameState> for GameStateFrame {
    type Error = serde_json::Error;

    fn try_from(raw: RawGameState) -> Result<Self, Self::Error> {
        let payload = match raw.compression_type {
            CompressionType::Full => GameStatePayload::Full(serde_json::from_value(raw.data)?),
            CompressionType::Delta => GameStatePayload::Delta(serde_json::from_value(raw.data)?),
        };
        Ok(Self {
            payload,
            timestamp: raw.timestamp,
        })
    }
}

impl Serialize for GameStateFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GameStateFrame", 3)?;
        state.serialize_field("compressionType", &self.payload.compression())?;
        match &self.payload {
            GameStatePayload::Full(snapshot) => state.serialize_field("data", snapshot)?,
            GameStatePayload::Delta(patch) => state.serialize_field("data", patch)?,
        }
        state.serialize_field("timestamp", &self.timestamp)?;
        state.end()
    }
}

/// Frames sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Heartbeat answer.
    Pong {
        /// Server send time, if present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },
    /// Replicated world state.
    GameState(GameStateFrame),
    /// Verdict on a predicted action.
    ActionConfirmation {
        /// Confirmation body.
        data: Confirmation,
        /// Server send time.
        #[serde(default)]
        timestamp: Timestamp,
    },
}

impl ServerMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pong { .. } => "pong",
            Self::GameState(_) => "gameState",
            Self::ActionConfirmation { .. } => "actionConfirmation",
        }
    }
}
