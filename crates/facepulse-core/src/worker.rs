//! Worker pool for collaborator calls
//!
//! Architecture:
//! - Bounded job channel shared by N worker threads; a full queue rejects
//!   new jobs instead of blocking the submitter
//! - One-shot result channel per job, awaited until a deadline
//! - Panics inside a job are caught and reported as `CollaboratorError::Panicked`
//! - Atomic metrics for observability
//!
//! Workers only compute. Results are applied to entity state by the thread
//! that awaits them, which keeps the entity store single-writer.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::CollaboratorError;

/// Queued jobs per worker thread before `submit` starts rejecting
const QUEUE_DEPTH_PER_WORKER: usize = 16;

/// How long shutdown waits for busy workers before detaching them
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("worker pool is shut down")]
    ShutDown,
    #[error("worker queue is full")]
    Saturated,
}

impl From<WorkerError> for CollaboratorError {
    fn from(_: WorkerError) -> Self {
        CollaboratorError::Unavailable
    }
}

/// Worker metrics tracked atomically
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub jobs_submitted: AtomicU64,
    pub jobs_rejected: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_panicked: AtomicU64,
    pub jobs_timed_out: AtomicU64,
}

impl WorkerMetrics {
    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerMetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_rejected: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_panicked: u64,
    pub jobs_timed_out: u64,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a submitted job
pub struct Pending<T> {
    rx: Receiver<Result<T, CollaboratorError>>,
    submitted_at: Instant,
    metrics: Arc<WorkerMetrics>,
}

impl<T> Pending<T> {
    /// Block until the job finishes or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> Result<T, CollaboratorError> {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until the job finishes or `deadline` passes.
    ///
    /// A job still running at the deadline keeps its worker; its result is
    /// discarded. The error carries the time since submission.
    pub fn wait_until(self, deadline: Instant) -> Result<T, CollaboratorError> {
        match self.rx.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.metrics.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
                Err(CollaboratorError::TimedOut(self.submitted_at.elapsed()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(CollaboratorError::Unavailable),
        }
    }
}

/// Fixed-size pool of worker threads
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    closing: Arc<AtomicBool>,
    metrics: Arc<WorkerMetrics>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Create and start `threads` workers (at least one)
    pub fn start(threads: usize) -> Result<Self, std::io::Error> {
        let threads = threads.max(1);
        let (tx, rx) = bounded::<Job>(threads * QUEUE_DEPTH_PER_WORKER);
        let closing = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(WorkerMetrics::default());

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let closing = Arc::clone(&closing);
            let handle = thread::Builder::new()
                .name(format!("facepulse-worker-{}", index))
                .spawn(move || Self::loop_forever(rx, closing))?;
            workers.push(handle);
        }
        log::debug!("Worker pool started with {} threads", threads);

        Ok(WorkerPool {
            tx: Some(tx),
            closing,
            metrics,
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job without blocking.
    ///
    /// Fails with `Saturated` when every worker is busy and the queue is full,
    /// e.g. behind collaborators that stopped answering.
    pub fn submit<T, F>(&self, job: F) -> Result<Pending<T>, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    {
        let tx = self.tx.as_ref().ok_or(WorkerError::ShutDown)?;
        let (result_tx, result_rx) = bounded(1);
        let metrics = Arc::clone(&self.metrics);

        let wrapped: Job = Box::new(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(value)) => {
                    metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Ok(Err(err)) => {
                    metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    Err(err)
                }
                Err(_) => {
                    metrics.jobs_panicked.fetch_add(1, Ordering::Relaxed);
                    Err(CollaboratorError::Panicked)
                }
            };
            // Receiver is gone when the caller timed out
            let _ = result_tx.send(result);
        });

        match tx.try_send(wrapped) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.jobs_rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Worker queue full, job rejected");
                return Err(WorkerError::Saturated);
            }
            Err(TrySendError::Disconnected(_)) => return Err(WorkerError::ShutDown),
        }
        self.metrics.jobs_submitted.fetch_add(1, Ordering::Relaxed);

        Ok(Pending {
            rx: result_rx,
            submitted_at: Instant::now(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Submit and wait in one call
    pub fn call<T, F>(&self, job: F, timeout: Duration) -> Result<T, CollaboratorError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    {
        self.submit(job)?.wait(timeout)
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the workers. Queued jobs are discarded.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    /// Workers still busy after `SHUTDOWN_GRACE` are detached, not joined.
    fn stop_workers(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        // Disconnecting ends each worker loop once its current job returns
        self.tx = None;

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        let mut busy = Vec::new();
        for handle in self.workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::warn!("Worker thread exited abnormally");
                }
            } else {
                busy.push(handle);
            }
        }
        if !busy.is_empty() {
            log::warn!("Detaching {} worker threads stuck in a job", busy.len());
        }
    }

    fn loop_forever(rx: Receiver<Job>, closing: Arc<AtomicBool>) {
        for job in rx.iter() {
            if closing.load(Ordering::SeqCst) {
                // Dropping the job disconnects its result channel
                continue;
            }
            job();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
