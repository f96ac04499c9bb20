//! # Sync Client
//!
//! One session's worth of synchronization, wired together.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SYNC CLIENT                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  handle_input ─► InputProcessor ─► SyncTransport ─┐          │
//! │                  (predict now)     (tier/limit/   │          │
//! │                                     batch)        ▼          │
//! │                                           Offloader (encode) │
//! │                                                   │          │
//! │                                                   ▼          │
//! │  poll ─────────► ConnectionSupervisor ◄──── OUTGOING_READY   │
//! │                  │ frames                                    │
//! │                  ▼                                           │
//! │                  Offloader (decode) ─► INCOMING_PROCESSED    │
//! │                                              │               │
//! │                   ┌──────────────┬───────────┴───┐           │
//! │                   ▼              ▼               ▼           │
//! │                 pong        DeltaCodec   ReconciliationEngine│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the caller's thread except the optional offload
//! executor. Notifications leave through the [`EventSink`] given at
//! construction; only connection exhaustion and persistent desync come
//! back from [`SyncClient::poll`] as errors.

use crate::clock::{Clock, Timestamp};
use crate::config::SyncConfig;
use crate::connection::{Channel, ConnectionState, ConnectionSupervisor};
use crate::error::{DeltaApplyError, MessageParseError, SyncError, SyncResult};
use crate::events::{EventSink, SyncEvent};
use crate::offload::{InlineOffload, OffloadExecutor, OffloadRequest, OffloadResponse, Offloader};
use crate::prediction::{InputProcessor, ReconciliationEngine, ReconciliationOutcome};
use crate::protocol::{ClientMessage, DeltaCodec, PlayerAction, ServerMessage};
use crate::snapshot::{PlayerState, StateSnapshot};
use crate::transport::{DispatchOutcome, Outbound, Priority, SendOutcome, SyncTransport};

/// What happened to one local input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputOutcome {
    /// Sequence number assigned to the action.
    pub sequence_number: u64,
    /// How the transport scheduled it.
    pub send: SendOutcome,
    /// Predicted player state after the action.
    pub predicted: PlayerState,
}

/// Client-level counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Inbound frames decoded and handled.
    pub frames_processed: u64,
    /// Inbound frames dropped as malformed.
    pub parse_errors: u64,
    /// Outgoing messages that failed to encode.
    pub encode_errors: u64,
    /// `gameState` frames applied.
    pub states_applied: u64,
    /// Deltas rejected by the codec.
    pub deltas_rejected: u64,
    /// `requestFullState` messages sent.
    pub full_state_requests: u64,
}

/// Routes transport output through the offloader for encoding.
///
/// The outcome reflects the channel state at dispatch time; the encoded
/// frame reaches the supervisor on the next pump.
struct OffloadOutbound<'a, E: OffloadExecutor> {
    offloader: &'a mut Offloader<E>,
    connected: bool,
}

impl<E: OffloadExecutor> Outbound for OffloadOutbound<'_, E> {
    fn dispatch(
        &mut self,
        message: ClientMessage,
        priority: Priority,
        _now: Timestamp,
    ) -> Result<DispatchOutcome, MessageParseError> {
        self.offloader
            .submit(OffloadRequest::QueueOutgoing { message, priority });
        Ok(if self.connected {
            DispatchOutcome::Sent
        } else {
            DispatchOutcome::Queued
        })
    }
}

/// Client synchronization core for one session.
pub struct SyncClient<C: Channel, K: Clock, E: OffloadExecutor = InlineOffload> {
    clock: K,
    supervisor: ConnectionSupervisor<C>,
    transport: SyncTransport,
    input: InputProcessor,
    reconciliation: ReconciliationEngine,
    codec: DeltaCodec,
    offloader: Offloader<E>,
    events: EventSink,
    desync_reported: bool,
    failure_reported: bool,
    pending_fatal: Option<SyncError>,
    stats: ClientStats,
}

impl<C: Channel, K: Clock> SyncClient<C, K, InlineOffload> {
    /// Creates a client that decodes and encodes on the caller's thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn new(
        config: SyncConfig,
        channel: C,
        clock: K,
        events: EventSink,
        initial: PlayerState,
    ) -> SyncResult<Self> {
        Self::build(config, channel, clock, None, events, initial)
    }
}

impl<C: Channel, K: Clock, E: OffloadExecutor> SyncClient<C, K, E> {
    /// Creates a client that hands decoding and encoding to `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn with_executor(
        config: SyncConfig,
        channel: C,
        clock: K,
        executor: E,
        events: EventSink,
        initial: PlayerState,
    ) -> SyncResult<Self> {
        Self::build(config, channel, clock, Some(executor), events, initial)
    }

    fn build(
        config: SyncConfig,
        channel: C,
        clock: K,
        executor: Option<E>,
        events: EventSink,
        initial: PlayerState,
    ) -> SyncResult<Self> {
        config.validate()?;
        let SyncConfig {
            connection,
            transport,
            prediction,
            codec,
        } = config;

        let reconciliation = ReconciliationEngine::new(
            prediction.divergence_tolerance,
            prediction.pending_timeout_ms,
            events.clone(),
        );
        Ok(Self {
            clock,
            supervisor: ConnectionSupervisor::new(channel, connection, events.clone()),
            transport: SyncTransport::new(transport),
            input: InputProcessor::new(prediction, initial, events.clone()),
            reconciliation,
            codec: DeltaCodec::new(codec),
            offloader: Offloader::with_executor(executor),
            events,
            desync_reported: false,
            failure_reported: false,
            pending_fatal: None,
            stats: ClientStats::default(),
        })
    }

    /// Starts connecting.
    pub fn connect(&mut self) {
        let now = self.clock.now();
        self.failure_reported = false;
        self.supervisor.connect(now);
    }

    /// Ends the session: closes the channel, cancels every timer and
    /// drops every queued message and baseline.
    pub fn disconnect(&mut self) {
        self.supervisor.disconnect();
        self.transport.clear();
        self.offloader.clear();
        self.codec.reset();
        self.desync_reported = false;
        self.pending_fatal = None;
        tracing::info!("session torn down");
    }

    /// Predicts a local action and schedules it for sending.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Parse`] if an immediate dispatch could not be
    /// encoded.
    pub fn handle_input(&mut self, action: PlayerAction) -> SyncResult<InputOutcome> {
        let now = self.clock.now();
        let sequenced = self.input.process(action, now);
        let sequence_number = sequenced.sequence_number;

        let mut out = OffloadOutbound {
            offloader: &mut self.offloader,
            connected: self.supervisor.is_connected(),
        };
        let send = self.transport.send(&mut out, sequenced, now)?;
        self.pump(now);

        Ok(InputOutcome {
            sequence_number,
            send,
            predicted: *self.input.predicted_state(),
        })
    }

    /// Runs everything that is due: channel events, heartbeat, reconnection,
    /// received frames, pending-action eviction and batch flushes.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConnectionExhausted`] once when reconnection
    /// gives up, and [`SyncError::PersistentDesync`] once per desync episode
    /// that full snapshots did not cure.
    pub fn poll(&mut self) -> SyncResult<()> {
        let now = self.clock.now();

        self.supervisor.poll(now);
        while let Some(frame) = self.supervisor.next_inbound() {
            self.offloader.submit(OffloadRequest::ProcessIncoming(frame));
        }
        self.pump(now);

        let evicted = self.input.evict_expired(now);
        if evicted > 0 {
            tracing::debug!(evicted, "pending actions timed out");
        }

        let mut out = OffloadOutbound {
            offloader: &mut self.offloader,
            connected: self.supervisor.is_connected(),
        };
        self.transport.poll(&mut out, now)?;
        self.pump(now);

        if self.supervisor.state() == ConnectionState::Failed && !self.failure_reported {
            self.failure_reported = true;
            return Err(SyncError::ConnectionExhausted {
                attempts: self.supervisor.attempt(),
            });
        }
        self.pending_fatal.take().map_or(Ok(()), Err)
    }

    fn pump(&mut self, now: Timestamp) {
        loop {
            let responses = self.offloader.poll();
            if responses.is_empty() {
                return;
            }
            for response in responses {
                match response {
                    OffloadResponse::IncomingProcessed(Ok(message)) => {
                        self.stats.frames_processed += 1;
                        self.handle_server_message(message, now);
                    }
                    OffloadResponse::IncomingProcessed(Err(e)) => {
                        self.stats.parse_errors += 1;
                        tracing::warn!(error = %e, "dropping malformed frame");
                    }
                    OffloadResponse::OutgoingReady(Ok(frame)) => {
                        self.supervisor.send_frame(frame, now);
                    }
                    OffloadResponse::OutgoingReady(Err(e)) => {
                        self.stats.encode_errors += 1;
                        tracing::error!(error = %e, "dropping message that failed to encode");
                    }
                }
            }
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage, now: Timestamp) {
        match message {
            ServerMessage::Pong { .. } => self.supervisor.on_pong(now),
            ServerMessage::GameState(frame) => {
                match self.codec.apply_incoming(frame.payload) {
                    Ok(snapshot) => {
                        let snapshot = snapshot.clone();
                        self.stats.states_applied += 1;
                        self.desync_reported = false;
                        self.events.emit(SyncEvent::StateReplicated(snapshot));
                    }
                    Err(e) => self.on_delta_rejected(&e, now),
                }
            }
            ServerMessage::ActionConfirmation { data, .. } => {
                let outcome = self.reconciliation.reconcile(&mut self.input, &data, now);
                if let ReconciliationOutcome::Corrected { replayed, .. } = outcome {
                    tracing::trace!(sequence = data.sequence_number, replayed, "reconciled");
                }
            }
        }
    }

    fn on_delta_rejected(&mut self, error: &DeltaApplyError, now: Timestamp) {
        self.stats.deltas_rejected += 1;
        if !self.codec.take_full_state_request() {
            tracing::trace!(%error, "delta dropped while a full snapshot is outstanding");
            return;
        }

        let desync_count = self.codec.desync_count();
        tracing::warn!(%error, desync_count, "delta rejected, requesting full state");
        self.request_full_state(now);
        self.events.emit(SyncEvent::FullStateRequested { desync_count });

        if self.codec.desync_is_persistent() && !self.desync_reported {
            self.desync_reported = true;
            tracing::error!(desync_count, "replication still out of sync");
            self.events.emit(SyncEvent::PersistentDesync {
                attempts: desync_count,
            });
            self.pending_fatal = Some(SyncError::PersistentDesync {
                attempts: desync_count,
            });
        }
    }

    fn request_full_state(&mut self, now: Timestamp) {
        self.stats.full_state_requests += 1;
        self.offloader.submit(OffloadRequest::QueueOutgoing {
            message: ClientMessage::RequestFullState { timestamp: now },
            priority: Priority::Critical,
        });
    }

    /// Connection state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Last measured round trip.
    #[inline]
    #[must_use]
    pub const fn latency_ms(&self) -> Option<u64> {
        self.supervisor.latency_ms()
    }

    /// Current predicted local player state.
    #[inline]
    #[must_use]
    pub const fn predicted_state(&self) -> &PlayerState {
        self.input.predicted_state()
    }

    /// Last replicated world state.
    #[inline]
    #[must_use]
    pub const fn world(&self) -> Option<&StateSnapshot> {
        self.codec.receive_baseline()
    }

    /// Number of actions awaiting confirmation.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.input.pending().len()
    }

    /// Earliest moment anything is due, for loops that sleep until work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Timestamp> {
        match (self.supervisor.next_deadline(), self.transport.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// The clock the client reads.
    #[must_use]
    pub const fn clock(&self) -> &K {
        &self.clock
    }

    /// Connection supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ConnectionSupervisor<C> {
        &self.supervisor
    }

    /// Outgoing scheduler.
    #[must_use]
    pub const fn transport(&self) -> &SyncTransport {
        &self.transport
    }

    /// Prediction state.
    #[must_use]
    pub const fn input(&self) -> &InputProcessor {
        &self.input
    }

    /// Reconciliation state.
    #[must_use]
    pub const fn reconciliation(&self) -> &ReconciliationEngine {
        &self.reconciliation
    }

    /// Replication codec.
    #[must_use]
    pub const fn codec(&self) -> &DeltaCodec {
        &self.codec
    }

    /// Offload front.
    #[must_use]
    pub const fn offloader(&self) -> &Offloader<E> {
        &self.offloader
    }

    /// Client-level counters.
    #[must_use]
    pub const fn stats(&self) -> &ClientStats {
        &self.stats
    }
}
