//! Executors: a dedicated thread, or the caller's own.

use std::collections::VecDeque;
use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::error::OffloadDispatchError;

use super::{process_job, OffloadExecutor, OffloadJob, OffloadResult, Rejected};

/// Runs jobs synchronously inside `submit`.
#[derive(Debug, Default)]
pub struct InlineOffload {
    done: VecDeque<OffloadResult>,
}

impl InlineOffload {
    /// Creates an inline executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffloadExecutor for InlineOffload {
    fn submit(&mut self, job: OffloadJob) -> Result<(), Rejected> {
        self.done.push_back(process_job(job));
        Ok(())
    }

    fn collect(&mut self, out: &mut Vec<OffloadResult>) -> Result<(), OffloadDispatchError> {
        out.extend(self.done.drain(..));
        Ok(())
    }
}

/// Runs jobs on one background thread.
///
/// Jobs go through a bounded queue; a full queue refuses the job so the
/// caller can run it inline. Dropping the executor closes the queue and
/// joins the thread.
pub struct WorkerOffload {
    jobs: Option<Sender<OffloadJob>>,
    results: Receiver<OffloadResult>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerOffload {
    /// Default job queue depth.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(capacity: usize) -> io::Result<Self> {
        let (job_tx, job_rx) = bounded::<OffloadJob>(capacity);
        let (result_tx, result_rx) = unbounded();

        let handle = thread::Builder::new()
            .name("blastline-offload".into())
            .spawn(move || {
                for job in &job_rx {
                    if result_tx.send(process_job(job)).is_err() {
                        break;
                    }
                }
                tracing::debug!("offload worker exiting");
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }
}

impl OffloadExecutor for WorkerOffload {
    fn submit(&mut self, job: OffloadJob) -> Result<(), Rejected> {
        let Some(jobs) = &self.jobs else {
            return Err(Rejected {
                error: OffloadDispatchError::Disconnected,
                job,
            });
        };
        jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => Rejected {
                error: OffloadDispatchError::Unavailable,
                job,
            },
            TrySendError::Disconnected(job) => Rejected {
                error: OffloadDispatchError::Disconnected,
                job,
            },
        })
    }

    fn collect(&mut self, out: &mut Vec<OffloadResult>) -> Result<(), OffloadDispatchError> {
        loop {
            match self.results.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(OffloadDispatchError::Disconnected),
            }
        }
    }
}

impl Drop for WorkerOffload {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("offload worker panicked");
            }
        }
    }
}
