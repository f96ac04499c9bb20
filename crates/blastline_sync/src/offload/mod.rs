//! # Offload Boundary
//!
//! Frame decoding and encoding can run off the event loop.
//!
//! ```text
//! event loop                         executor
//! ──────────                         ────────
//! PROCESS_INCOMING(text)   ──job──►  decode_server
//! QUEUE_OUTGOING(message)  ──job──►  encode_client
//!            ◄──result──  INCOMING_PROCESSED / OUTGOING_READY
//! ```
//!
//! Jobs and results are copied across, never shared. The boundary is
//! at-least-once and FIFO: [`Offloader`] numbers every job, drops
//! duplicate results and releases results strictly in submission order.
//! When the executor refuses a job, or dies, the work runs inline instead;
//! callers see the same results, only later or sooner.

mod worker;

pub use worker::{InlineOffload, WorkerOffload};

use std::collections::{BTreeMap, VecDeque};

use crate::connection::OutgoingFrame;
use crate::error::{MessageParseError, OffloadDispatchError};
use crate::protocol::{decode_server, encode_client, ClientMessage, ServerMessage};
use crate::transport::Priority;

/// Job number, assigned in submission order.
pub type JobId = u64;

/// Work that can be offloaded.
#[derive(Clone, Debug, PartialEq)]
pub enum OffloadRequest {
    /// Decode a received frame.
    ProcessIncoming(String),
    /// Encode a message for sending.
    QueueOutgoing {
        /// Message to encode.
        message: ClientMessage,
        /// Priority of the message.
        priority: Priority,
    },
}

impl OffloadRequest {
    /// Wire name of the request type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProcessIncoming(_) => "PROCESS_INCOMING",
            Self::QueueOutgoing { .. } => "QUEUE_OUTGOING",
        }
    }
}

/// Result of an offloaded job.
#[derive(Clone, Debug, PartialEq)]
pub enum OffloadResponse {
    /// Decoded frame.
    IncomingProcessed(Result<ServerMessage, MessageParseError>),
    /// Encoded frame.
    OutgoingReady(Result<OutgoingFrame, MessageParseError>),
}

impl OffloadResponse {
    /// Wire name of the response type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IncomingProcessed(_) => "INCOMING_PROCESSED",
            Self::OutgoingReady(_) => "OUTGOING_READY",
        }
    }
}

/// A numbered request.
#[derive(Clone, Debug, PartialEq)]
pub struct OffloadJob {
    /// Job number.
    pub id: JobId,
    /// The work.
    pub request: OffloadRequest,
}

/// A numbered response.
#[derive(Clone, Debug, PartialEq)]
pub struct OffloadResult {
    /// Number of the job this answers.
    pub id: JobId,
    /// The result.
    pub response: OffloadResponse,
}

/// Runs one job. Executors of every kind call this.
#[must_use]
pub fn process_job(job: OffloadJob) -> OffloadResult {
    let response = match job.request {
        OffloadRequest::ProcessIncoming(text) => {
            OffloadResponse::IncomingProcessed(decode_server(&text))
        }
        OffloadRequest::QueueOutgoing { message, priority } => OffloadResponse::OutgoingReady(
            encode_client(&message).map(|text| OutgoingFrame { text, priority }),
        ),
    };
    OffloadResult {
        id: job.id,
        response,
    }
}

/// A job the executor did not take, handed back with the reason.
#[derive(Debug)]
pub struct Rejected {
    /// Why it was refused.
    pub error: OffloadDispatchError,
    /// The job, untouched.
    pub job: OffloadJob,
}

/// Something that runs [`OffloadJob`]s.
pub trait OffloadExecutor {
    /// Hands a job over.
    ///
    /// # Errors
    ///
    /// Returns the job back in [`Rejected`] if it cannot be taken.
    fn submit(&mut self, job: OffloadJob) -> Result<(), Rejected>;

    /// Moves finished results into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadDispatchError::Disconnected`] once the executor is
    /// gone for good; results gathered before that are still in `out`.
    fn collect(&mut self, out: &mut Vec<OffloadResult>) -> Result<(), OffloadDispatchError>;
}

/// Offload statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffloadStats {
    /// Jobs handed to the executor.
    pub offloaded: u64,
    /// Jobs run inline, for lack of an executor or after it refused.
    pub inline: u64,
    /// Duplicate results dropped.
    pub duplicates: u64,
    /// Results abandoned by [`Offloader::clear`].
    pub discarded: u64,
}

/// Ordered, de-duplicating front of an [`OffloadExecutor`] with inline
/// fallback.
pub struct Offloader<E: OffloadExecutor> {
    executor: Option<E>,
    next_id: JobId,
    next_deliver: JobId,
    in_flight: BTreeMap<JobId, OffloadRequest>,
    reorder: BTreeMap<JobId, OffloadResponse>,
    ready: VecDeque<OffloadResponse>,
    scratch: Vec<OffloadResult>,
    stats: OffloadStats,
}

impl<E: OffloadExecutor> Offloader<E> {
    /// Wraps an executor.
    pub fn new(executor: E) -> Self {
        Self::with_executor(Some(executor))
    }

    /// Wraps an optional executor; without one every job runs inline.
    pub fn with_executor(executor: Option<E>) -> Self {
        Self {
            executor,
            next_id: 0,
            next_deliver: 0,
            in_flight: BTreeMap::new(),
            reorder: BTreeMap::new(),
            ready: VecDeque::new(),
            scratch: Vec::new(),
            stats: OffloadStats::default(),
        }
    }

    /// Returns true while an executor is attached.
    #[must_use]
    pub const fn is_offloading(&self) -> bool {
        self.executor.is_some()
    }

    /// Statistics.
    #[must_use]
    pub const fn stats(&self) -> &OffloadStats {
        &self.stats
    }

    /// Submits a request.
    pub fn submit(&mut self, request: OffloadRequest) {
        let id = self.next_id;
        self.next_id += 1;
        let job = OffloadJob { id, request };

        let Some(executor) = self.executor.as_mut() else {
            self.run_inline(job);
            return;
        };

        let request = job.request.clone();
        match executor.submit(job) {
            Ok(()) => {
                self.stats.offloaded += 1;
                self.in_flight.insert(id, request);
            }
            Err(Rejected { error, job }) => {
                tracing::warn!(%error, kind = job.request.kind(), "offload refused, running inline");
                if error == OffloadDispatchError::Disconnected {
                    self.detach();
                }
                self.run_inline(job);
            }
        }
    }

    /// Abandons every job issued so far. Results the executor still
    /// returns for them are dropped on arrival.
    pub fn clear(&mut self) {
        let abandoned = self.in_flight.len() + self.reorder.len() + self.ready.len();
        if abandoned > 0 {
            tracing::debug!(abandoned, "discarding offload work");
        }
        self.stats.discarded += abandoned as u64;
        self.in_flight.clear();
        self.reorder.clear();
        self.ready.clear();
        self.next_deliver = self.next_id;
    }

    /// Gathers finished work and returns it in submission order.
    pub fn poll(&mut self) -> Vec<OffloadResponse> {
        if let Some(executor) = self.executor.as_mut() {
            let mut results = std::mem::take(&mut self.scratch);
            let status = executor.collect(&mut results);
            for result in results.drain(..) {
                self.accept(result);
            }
            self.scratch = results;

            if let Err(error) = status {
                tracing::warn!(%error, "offload executor lost, switching to inline");
                self.detach();
            }
        }
        self.ready.drain(..).collect()
    }

    fn detach(&mut self) {
        self.executor = None;
        // Redo whatever the executor took but never answered
        let orphans = std::mem::take(&mut self.in_flight);
        for (id, request) in orphans {
            self.run_inline(OffloadJob { id, request });
        }
    }

    fn run_inline(&mut self, job: OffloadJob) {
        self.stats.inline += 1;
        let result = process_job(job);
        self.accept(result);
    }

    fn accept(&mut self, result: OffloadResult) {
        // Below next_deliver: delivered already, or abandoned by clear
        if result.id < self.next_deliver || self.reorder.contains_key(&result.id) {
            self.stats.duplicates += 1;
            tracing::trace!(id = result.id, "duplicate offload result dropped");
            return;
        }
        self.in_flight.remove(&result.id);
        self.reorder.insert(result.id, result.response);

        while let Some(response) = self.reorder.remove(&self.next_deliver) {
            self.ready.push_back(response);
            self.next_deliver += 1;
        }
    }
}
