//! In-memory channel for tests and the soak binary.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::{Channel, ChannelEvent, CloseCode};
use crate::error::ConnectionError;
use crate::protocol::{decode_client, ClientMessage};

#[derive(Debug)]
struct Shared {
    open: bool,
    auto_open: bool,
    refuse_opens: u32,
    fail_opens: u32,
    open_requests: u32,
    sent: Vec<String>,
    events: VecDeque<ChannelEvent>,
    closes: Vec<CloseCode>,
}

/// Client end of an in-memory channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    shared: Arc<Mutex<Shared>>,
}

/// Test end of a [`LoopbackChannel`]: sees what the client wrote and
/// injects what the "server" says.
#[derive(Clone, Debug)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackChannel {
    /// Creates a channel that opens as soon as asked.
    #[must_use]
    pub fn pair() -> (Self, LoopbackHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            open: false,
            auto_open: true,
            refuse_opens: 0,
            fail_opens: 0,
            open_requests: 0,
            sent: Vec::new(),
            events: VecDeque::new(),
            closes: Vec::new(),
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackHandle { shared },
        )
    }
}

impl Channel for LoopbackChannel {
    fn open(&mut self) -> Result<(), ConnectionError> {
        let mut shared = self.shared.lock();
        shared.open_requests += 1;

        if shared.refuse_opens > 0 {
            shared.refuse_opens -= 1;
            return Err(ConnectionError::ChannelUnavailable("refused".into()));
        }
        if shared.fail_opens > 0 {
            shared.fail_opens -= 1;
            shared.events.push_back(ChannelEvent::Closed(CloseCode::Abnormal(1006)));
            return Ok(());
        }
        if shared.auto_open {
            shared.open = true;
            shared.events.push_back(ChannelEvent::Opened);
        }
        Ok(())
    }

    fn send(&mut self, frame: &str) -> Result<(), ConnectionError> {
        let mut shared = self.shared.lock();
        if !shared.open {
            return Err(ConnectionError::NotConnected);
        }
        shared.sent.push(frame.to_owned());
        Ok(())
    }

    fn close(&mut self, code: CloseCode) {
        let mut shared = self.shared.lock();
        shared.open = false;
        shared.closes.push(code);
    }

    fn poll_event(&mut self) -> Option<ChannelEvent> {
        self.shared.lock().events.pop_front()
    }
}

impl LoopbackHandle {
    /// Delivers a text frame to the client.
    pub fn push_frame(&self, frame: impl Into<String>) {
        self.shared.lock().events.push_back(ChannelEvent::Frame(frame.into()));
    }

    /// Drops the channel from the far side.
    pub fn drop_connection(&self, code: CloseCode) {
        let mut shared = self.shared.lock();
        shared.open = false;
        shared.events.push_back(ChannelEvent::Closed(code));
    }

    /// Whether `open` completes on its own.
    pub fn set_auto_open(&self, auto_open: bool) {
        self.shared.lock().auto_open = auto_open;
    }

    /// Makes the next `n` opens fail synchronously.
    pub fn refuse_next_opens(&self, n: u32) {
        self.shared.lock().refuse_opens = n;
    }

    /// Makes the next `n` opens start, then close abnormally.
    pub fn fail_next_opens(&self, n: u32) {
        self.shared.lock().fail_opens = n;
    }

    /// Number of `open` calls so far.
    #[must_use]
    pub fn open_requests(&self) -> u32 {
        self.shared.lock().open_requests
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    /// Close codes the client used, in order.
    #[must_use]
    pub fn closes(&self) -> Vec<CloseCode> {
        self.shared.lock().closes.clone()
    }

    /// Takes every frame the client wrote since the last call.
    #[must_use]
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.lock().sent)
    }

    /// Takes and decodes written frames, skipping pings.
    #[must_use]
    pub fn take_messages(&self) -> Vec<ClientMessage> {
        self.take_sent()
            .iter()
            .filter_map(|frame| decode_client(frame).ok())
            .filter(|message| !matches!(message, ClientMessage::Ping { .. }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_send_close() {
        let (mut channel, handle) = LoopbackChannel::pair();
        assert_eq!(channel.send("early"), Err(ConnectionError::NotConnected));

        channel.open().unwrap();
        assert_eq!(channel.poll_event(), Some(ChannelEvent::Opened));
        channel.send("hello").unwrap();
        assert_eq!(handle.take_sent(), vec!["hello"]);

        channel.close(CloseCode::Normal);
        assert!(!handle.is_open());
        assert_eq!(handle.closes(), vec![CloseCode::Normal]);
    }

    #[test]
    fn test_scripted_failures() {
        let (mut channel, handle) = LoopbackChannel::pair();
        handle.refuse_next_opens(1);
        handle.fail_next_opens(1);

        assert!(channel.open().is_err());
        channel.open().unwrap();
        assert_eq!(
            channel.poll_event(),
            Some(ChannelEvent::Closed(CloseCode::Abnormal(1006)))
        );
        channel.open().unwrap();
        assert_eq!(channel.poll_event(), Some(ChannelEvent::Opened));
        assert_eq!(handle.open_requests(), 3);
    }
}
