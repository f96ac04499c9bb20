//! Duplex text channel abstraction.

use std::fmt;

use crate::error::ConnectionError;

/// How a channel was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly close (1000). No reconnection.
    Normal,
    /// Anything else. Triggers reconnection.
    Abnormal(u16),
}

impl CloseCode {
    /// Code used by a normal close.
    pub const NORMAL: u16 = 1000;
    /// Code used when the heartbeat times out.
    pub const HEARTBEAT_TIMEOUT: Self = Self::Abnormal(4000);
    /// Code used when a write fails.
    pub const SEND_FAILURE: Self = Self::Abnormal(4001);
    /// Code used when an open takes too long.
    pub const CONNECT_TIMEOUT: Self = Self::Abnormal(4002);

    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Normal => Self::NORMAL,
            Self::Abnormal(code) => code,
        }
    }

    /// Returns true for an orderly close.
    #[must_use]
    pub const fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        if code == Self::NORMAL {
            Self::Normal
        } else {
            Self::Abnormal(code)
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal ({})", Self::NORMAL),
            Self::Abnormal(code) => write!(f, "abnormal ({code})"),
        }
    }
}

/// Something the channel reports back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The open requested earlier has completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The channel closed.
    Closed(CloseCode),
}

/// Ordered, reliable duplex text channel (a WebSocket, typically).
///
/// `open` only starts the handshake. Completion, inbound frames and closes
/// all arrive through [`poll_event`](Channel::poll_event), in order.
pub trait Channel {
    /// Starts opening the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ChannelUnavailable`] if the attempt
    /// cannot even start.
    fn open(&mut self) -> Result<(), ConnectionError>;

    /// Writes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the frame could not be written.
    fn send(&mut self, frame: &str) -> Result<(), ConnectionError>;

    /// Closes the channel with `code`.
    fn close(&mut self, code: CloseCode);

    /// Next pending event, if any.
    fn poll_event(&mut self) -> Option<ChannelEvent>;
}
