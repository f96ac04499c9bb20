//! # Frame Serialization
//!
//! Text frames in, typed messages out. Decoding failures are reported as
//! [`MessageParseError`] and the caller drops the frame; nothing here
//! panics on hostile input.

use crate::error::MessageParseError;
use crate::protocol::messages::{ClientMessage, ServerMessage};

/// Encodes a client message as a JSON text frame.
///
/// # Errors
///
/// Returns [`MessageParseError::Encode`] if serialization fails.
pub fn encode_client(message: &ClientMessage) -> Result<String, MessageParseError> {
    serde_json::to_string(message).map_err(|e| MessageParseError::Encode {
        kind: message.kind(),
        reason: e.to_string(),
    })
}

/// Decodes a server text frame.
///
/// # Errors
///
/// Returns [`MessageParseError::Malformed`] for invalid JSON, an unknown
/// `type`, or a body that does not match its type.
pub fn decode_server(frame: &str) -> Result<ServerMessage, MessageParseError> {
    serde_json::from_str(frame).map_err(|e| MessageParseError::Malformed(e.to_string()))
}

/// Encodes a server message. Used by the loopback server.
///
/// # Errors
///
/// Returns [`MessageParseError::Encode`] if serialization fails.
pub fn encode_server(message: &ServerMessage) -> Result<String, MessageParseError> {
    serde_json::to_string(message).map_err(|e| MessageParseError::Encode {
        kind: message.kind(),
        reason: e.to_string(),
    })
}

/// Decodes a client text frame. Used by the loopback server.
///
/// # Errors
///
/// Returns [`MessageParseError::Malformed`] if the frame is not a known
/// client message.
pub fn decode_client(frame: &str) -> Result<ClientMessage, MessageParseError> {
    serde_json::from_str(frame).map_err(|e| MessageParseError::Malformed(e.to_string()))
}
