//! # Connection Supervision
//!
//! Owns the duplex channel: connect, heartbeat, timeout detection and
//! bounded reconnection with a linearly growing delay.
//!
//! ## State Machine
//!
//! ```text
//!                connect()           Opened
//! Disconnected ───────────► Connecting ─────► Connected
//!      ▲                        ▲                 │
//!      │ Closed(normal)         │ delay elapsed   │ Closed(abnormal)
//!      │ or disconnect()        │                 │ or pong timeout
//!      │                        │                 │ or open timeout
//!      │                   Reconnecting ◄─────────┘
//!      │                        │
//!      │                        │ attempt > max
//!      │                        ▼
//!      └──────────────────── Failed  (fatal event)
//! ```
//!
//! ## Rules
//!
//! - delay = base × attempt, attempt ∈ 1..=max
//! - Frames sent while not connected wait in a FIFO offline queue and are
//!   flushed, in order, as soon as the channel opens
//! - An open that neither completes nor fails within
//!   `connect_timeout_ms` is abandoned like an abnormal close
//! - Frames are only accepted while connected; anything a dead channel
//!   still reports is dropped
//! - The offline queue is bounded; on overflow the oldest non-critical
//!   frame goes first, critical frames are never dropped
//! - [`disconnect`](ConnectionSupervisor::disconnect) cancels every timer
//!   and clears every queue in one call

mod channel;

pub use channel::{Channel, ChannelEvent, CloseCode};

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{TimerKind, TimerSet, Timestamp};
use crate::error::{ConnectionError, MessageParseError};
use crate::events::{EventSink, SyncEvent};
use crate::protocol::{encode_client, ClientMessage};
use crate::transport::{DispatchOutcome, Outbound, Priority};

/// Lifecycle state of the channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No channel, no reconnection pending.
    #[default]
    Disconnected = 0,
    /// Open requested, handshake pending.
    Connecting = 1,
    /// Channel open.
    Connected = 2,
    /// Waiting out the delay before the next attempt.
    Reconnecting = 3,
    /// Gave up. Only an explicit `connect` leaves this state.
    Failed = 4,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        })
    }
}

/// Encoded frame waiting to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingFrame {
    /// JSON text.
    pub text: String,
    /// Priority of the message it encodes.
    pub priority: Priority,
}

/// Connection configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Interval between pings while connected.
    pub heartbeat_interval_ms: u64,
    /// Time an unanswered ping may wait before the channel is dropped.
    pub heartbeat_timeout_ms: u64,
    /// Time an open may take before the attempt is abandoned.
    pub connect_timeout_ms: u64,
    /// Delay unit; attempt `n` waits `n` units.
    pub reconnect_base_delay_ms: u64,
    /// Reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Bound of the offline queue.
    pub max_offline_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: 5,
            max_offline_queue: 256,
        }
    }
}

impl ConnectionConfig {
    /// Short timings for a server on the same machine.
    #[must_use]
    pub const fn local() -> Self {
        Self {
            heartbeat_interval_ms: 250,
            heartbeat_timeout_ms: 1000,
            connect_timeout_ms: 1000,
            reconnect_base_delay_ms: 100,
            max_reconnect_attempts: 5,
            max_offline_queue: 256,
        }
    }
}

/// Delay before reconnection attempt `attempt` (1-based).
#[inline]
#[must_use]
pub const fn reconnect_delay(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(attempt as u64)
}

/// Connection statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames written.
    pub frames_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Bytes written.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Pings sent.
    pub pings_sent: u64,
    /// Pongs received.
    pub pongs_received: u64,
    /// Reconnection attempts scheduled.
    pub reconnect_attempts: u64,
    /// Channels dropped for a missing pong.
    pub heartbeat_timeouts: u64,
    /// Opens abandoned for taking too long.
    pub connect_timeouts: u64,
    /// Frames reported by a channel that was no longer connected.
    pub stale_frames: u64,
    /// Frames dropped from a full offline queue.
    pub offline_dropped: u64,
}

/// Supervises one channel for the lifetime of a session.
pub struct ConnectionSupervisor<C: Channel> {
    channel: C,
    config: ConnectionConfig,
    state: ConnectionState,
    attempt: u32,
    timers: TimerSet,
    last_ping_sent_at: Option<Timestamp>,
    awaiting_pong_since: Option<Timestamp>,
    latency_ms: Option<u64>,
    offline: VecDeque<OutgoingFrame>,
    inbound: VecDeque<String>,
    events: EventSink,
    stats: ConnectionStats,
}

impl<C: Channel> ConnectionSupervisor<C> {
    /// Creates a supervisor in the `Disconnected` state.
    pub fn new(channel: C, config: ConnectionConfig, events: EventSink) -> Self {
        Self {
            channel,
            config,
            state: ConnectionState::Disconnected,
            attempt: 0,
            timers: TimerSet::new(),
            last_ping_sent_at: None,
            awaiting_pong_since: None,
            latency_ms: None,
            offline: VecDeque::new(),
            inbound: VecDeque::new(),
            events,
            stats: ConnectionStats::default(),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true while the channel is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Current reconnection attempt, 0 when none is in progress.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Last measured round trip.
    #[must_use]
    pub const fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    /// Frames waiting for the channel to open.
    #[must_use]
    pub fn offline_queue(&self) -> impl Iterator<Item = &OutgoingFrame> {
        self.offline.iter()
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Deadline of an armed timer.
    #[must_use]
    pub const fn timer(&self, kind: TimerKind) -> Option<Timestamp> {
        self.timers.deadline(kind)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Starts connecting. No-op while connecting or connected.
    pub fn connect(&mut self, now: Timestamp) {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            ConnectionState::Reconnecting => {
                // Skip the rest of the delay
                self.timers.cancel(TimerKind::Reconnect);
                self.open(now);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.attempt = 0;
                self.open(now);
            }
        }
    }

    /// Tears the session down: closes normally, cancels every timer,
    /// drops every queued frame.
    pub fn disconnect(&mut self) {
        self.timers.cancel_all();
        if !self.offline.is_empty() {
            tracing::debug!(count = self.offline.len(), "discarding offline queue");
        }
        self.offline.clear();
        self.inbound.clear();
        self.awaiting_pong_since = None;
        self.last_ping_sent_at = None;
        self.attempt = 0;

        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.channel.close(CloseCode::Normal);
        }
        self.transition(ConnectionState::Disconnected);
    }

    /// Processes channel events and due timers.
    pub fn poll(&mut self, now: Timestamp) {
        while let Some(event) = self.channel.poll_event() {
            match event {
                ChannelEvent::Opened => self.on_open(now),
                ChannelEvent::Frame(text) if self.is_connected() => {
                    self.stats.frames_received += 1;
                    self.stats.bytes_received += text.len() as u64;
                    self.inbound.push_back(text);
                }
                ChannelEvent::Frame(_) => {
                    self.stats.stale_frames += 1;
                    tracing::trace!(state = %self.state, "dropping frame from a closed channel");
                }
                ChannelEvent::Closed(code) => self.on_close(code, now),
            }
        }

        match self.state {
            ConnectionState::Reconnecting => {
                if self.timers.take_due(TimerKind::Reconnect, now) {
                    tracing::info!("Reconnection attempt {}", self.attempt);
                    self.open(now);
                }
            }
            ConnectionState::Connected => {
                if self.timers.take_due(TimerKind::HeartbeatTimeout, now) {
                    let silent_for = self.awaiting_pong_since.map_or(0, |since| now.saturating_sub(since));
                    tracing::warn!(silent_for, "no pong within heartbeat timeout, dropping channel");
                    self.stats.heartbeat_timeouts += 1;
                    self.fail(CloseCode::HEARTBEAT_TIMEOUT, now);
                } else if self.timers.take_due(TimerKind::Heartbeat, now) {
                    self.send_ping(now);
                }
            }
            ConnectionState::Connecting => {
                if self.timers.take_due(TimerKind::ConnectTimeout, now) {
                    tracing::warn!(
                        timeout_ms = self.config.connect_timeout_ms,
                        "open did not complete, abandoning attempt"
                    );
                    self.stats.connect_timeouts += 1;
                    self.fail(CloseCode::CONNECT_TIMEOUT, now);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }
    }

    /// Next received frame, in arrival order.
    pub fn next_inbound(&mut self) -> Option<String> {
        self.inbound.pop_front()
    }

    /// Records a pong and updates latency.
    pub fn on_pong(&mut self, now: Timestamp) {
        self.stats.pongs_received += 1;
        self.awaiting_pong_since = None;
        self.timers.cancel(TimerKind::HeartbeatTimeout);

        if let Some(sent_at) = self.last_ping_sent_at {
            let latency_ms = now.saturating_sub(sent_at);
            self.latency_ms = Some(latency_ms);
            self.events.emit(SyncEvent::LatencyUpdated { latency_ms });
        }
    }

    /// Writes a frame, or queues it until the channel opens.
    pub fn send_frame(&mut self, frame: OutgoingFrame, now: Timestamp) -> DispatchOutcome {
        if !self.is_connected() {
            self.enqueue_offline(frame);
            return DispatchOutcome::Queued;
        }

        match self.write(&frame.text) {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                tracing::warn!(error = %e, "write failed, queueing frame and reconnecting");
                self.enqueue_offline(frame);
                self.fail(CloseCode::SEND_FAILURE, now);
                DispatchOutcome::Queued
            }
        }
    }

    fn open(&mut self, now: Timestamp) {
        self.transition(ConnectionState::Connecting);
        match self.channel.open() {
            Ok(()) => self
                .timers
                .schedule(TimerKind::ConnectTimeout, now + self.config.connect_timeout_ms),
            Err(e) => {
                tracing::warn!(error = %e, "failed to open channel");
                self.schedule_reconnect(now);
            }
        }
    }

    fn on_open(&mut self, now: Timestamp) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "ignoring unexpected open");
            return;
        }

        self.attempt = 0;
        self.awaiting_pong_since = None;
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.transition(ConnectionState::Connected);
        self.timers
            .schedule(TimerKind::Heartbeat, now + self.config.heartbeat_interval_ms);
        self.flush_offline(now);
    }

    fn on_close(&mut self, code: CloseCode, now: Timestamp) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::debug!(%code, state = %self.state, "ignoring close");
            return;
        }

        if code.is_normal() {
            self.timers.cancel_all();
            self.awaiting_pong_since = None;
            self.transition(ConnectionState::Disconnected);
        } else {
            tracing::warn!(%code, "channel closed");
            self.schedule_reconnect(now);
        }
    }

    fn fail(&mut self, code: CloseCode, now: Timestamp) {
        self.channel.close(code);
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Timestamp) {
        self.timers.cancel_all();
        self.awaiting_pong_since = None;

        if self.attempt >= self.config.max_reconnect_attempts {
            tracing::error!("Giving up after {} reconnection attempts", self.attempt);
            self.transition(ConnectionState::Failed);
            self.events.emit(SyncEvent::ConnectionFailed {
                attempts: self.attempt,
            });
            return;
        }

        self.attempt += 1;
        let delay_ms = reconnect_delay(self.config.reconnect_base_delay_ms, self.attempt);
        self.timers.schedule(TimerKind::Reconnect, now + delay_ms);
        self.stats.reconnect_attempts += 1;
        self.transition(ConnectionState::Reconnecting);
        tracing::info!(attempt = self.attempt, delay_ms, "reconnect scheduled");
        self.events.emit(SyncEvent::ReconnectScheduled {
            attempt: self.attempt,
            delay_ms,
        });
    }

    fn send_ping(&mut self, now: Timestamp) {
        self.timers
            .schedule(TimerKind::Heartbeat, now + self.config.heartbeat_interval_ms);

        let text = match encode_client(&ClientMessage::Ping { timestamp: now }) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode ping");
                return;
            }
        };
        if let Err(e) = self.write(&text) {
            tracing::warn!(error = %e, "ping write failed");
            self.fail(CloseCode::SEND_FAILURE, now);
            return;
        }

        self.stats.pings_sent += 1;
        self.last_ping_sent_at = Some(now);
        if self.awaiting_pong_since.is_none() {
            self.awaiting_pong_since = Some(now);
            self.timers
                .schedule(TimerKind::HeartbeatTimeout, now + self.config.heartbeat_timeout_ms);
        }
    }

    fn write(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.channel.send(text)?;
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += text.len() as u64;
        Ok(())
    }

    fn flush_offline(&mut self, now: Timestamp) {
        if !self.offline.is_empty() {
            tracing::debug!(count = self.offline.len(), "flushing offline queue");
        }
        while let Some(frame) = self.offline.pop_front() {
            if let Err(e) = self.write(&frame.text) {
                tracing::warn!(error = %e, "flush interrupted");
                self.offline.push_front(frame);
                self.fail(CloseCode::SEND_FAILURE, now);
                return;
            }
        }
    }

    fn enqueue_offline(&mut self, frame: OutgoingFrame) {
        self.offline.push_back(frame);
        while self.offline.len() > self.config.max_offline_queue {
            let Some(index) = self.offline.iter().position(|f| !f.priority.is_critical()) else {
                break;
            };
            if let Some(dropped) = self.offline.remove(index) {
                self.stats.offline_dropped += 1;
                tracing::warn!(priority = %dropped.priority, "offline queue full, dropped oldest frame");
            }
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!("Connection {} -> {}", from, to);
        self.events.emit(SyncEvent::ConnectionStateChanged { from, to });
    }
}

impl<C: Channel> Outbound for ConnectionSupervisor<C> {
    fn dispatch(
        &mut self,
        message: ClientMessage,
        priority: Priority,
        now: Timestamp,
    ) -> Result<DispatchOutcome, MessageParseError> {
        let text = encode_client(&message)?;
        Ok(self.send_frame(OutgoingFrame { text, priority }, now))
    }
}
