//! The bounded, retrying, drainable work pipeline.
//!
//! A [`Pipeline`] owns one [`BoundedQueue`], a fixed pool of workers and the
//! [`Backend`] they all share:
//!
//! ```text
//! producer ──submit──▶ BoundedQueue ──▶ worker ──▶ Backend::execute
//!                           ▲                           │ failure
//!                           └──── resubmit (best effort) ◀┘ after backoff
//! ```
//!
//! No ordering holds across workers: jobs A then B may finish B then A, and a
//! retried job re-enters at the back of the queue.
//!
//! # Examples
//!
//! ```rust,no_run
//! use spool::backend::{BackendError, FnBackend};
//! use spool::config::PipelineConfig;
//! use spool::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = FnBackend::new(|stmt: &String| {
//!         let stmt = stmt.clone();
//!         async move {
//!             println!("executing {stmt}");
//!             Ok::<_, BackendError>(())
//!         }
//!     });
//!
//!     let pipeline = Pipeline::open(PipelineConfig::default().with_workers(4), backend).await?;
//!     pipeline.submit("INSERT INTO logs VALUES ('hello')".to_string()).await?;
//!     pipeline.close().await?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendError};
use crate::config::PipelineConfig;
use crate::job::Job;
use crate::queue::{BoundedQueue, QueueError};
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::supervise::{Fault, run_supervised};

pub mod stats;
mod worker;

pub use stats::PipelineStats;
use stats::Counters;

/// Errors from opening a pipeline or calling its backend directly.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("backend initialization failed: {0}")]
    Init(#[source] BackendError),

    #[error("pipeline is {0}")]
    NotOpen(PipelineState),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Why a job was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("pipeline is closed")]
    Closed,

    #[error("queue is full")]
    Full,
}

impl<T> From<QueueError<T>> for SubmitError {
    fn from(err: QueueError<T>) -> Self {
        match err {
            QueueError::Full(_) => SubmitError::Full,
            QueueError::Closed(_) => SubmitError::Closed,
        }
    }
}

/// The backend failed to release. Cloned to every caller of
/// [`Pipeline::close`].
#[derive(Debug, Clone, Error)]
#[error("failed to release backend: {source}")]
pub struct CloseError {
    #[source]
    source: Arc<BackendError>,
}

impl CloseError {
    pub fn backend_error(&self) -> &BackendError {
        &self.source
    }
}

/// Why a single execution attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Lifecycle of a pipeline. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl PipelineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PipelineState::Open,
            1 => PipelineState::Closing,
            _ => PipelineState::Closed,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Open => "open",
            PipelineState::Closing => "closing",
            PipelineState::Closed => "closed",
        })
    }
}

// State shared between the pipeline handle and its workers.
struct Shared<B: Backend> {
    backend: Arc<B>,
    queue: BoundedQueue<Job<B::Payload>>,
    retry: RetryScheduler,
    config: PipelineConfig,
    cancel: CancellationToken,
    counters: Counters,
    state: AtomicU8,
    next_id: AtomicU64,
    // Direct calls hold a read guard so the backend is never released under
    // them.
    direct: RwLock<()>,
}

impl<B: Backend> Shared<B> {
    fn new_job(&self, payload: B::Payload) -> Job<B::Payload> {
        Job::new(self.next_id.fetch_add(1, Ordering::Relaxed), payload)
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn stats(&self) -> PipelineStats {
        self.counters.snapshot(self.queue.len())
    }

    /// Runs one supervised attempt: panics and deadline overruns come back as
    /// [`AttemptError::Fault`].
    async fn attempt(&self, job: &Job<B::Payload>) -> Result<(), AttemptError> {
        let backend = Arc::clone(&self.backend);
        let payload = job.shared_payload();
        let work = async move { backend.execute(&payload).await.map(drop) };

        run_supervised(work, self.config.job_timeout).await??;
        Ok(())
    }
}

enum Lifecycle {
    Running(Vec<JoinHandle<()>>),
    // Owned by the lifecycle, not by a caller, so a dropped `close` future
    // cannot lose the worker handles.
    Closing(JoinHandle<Result<(), CloseError>>),
    Closed(Result<(), CloseError>),
}

/// Joins every worker, discards leftovers, then releases the backend.
async fn shutdown<B: Backend>(
    shared: Arc<Shared<B>>,
    workers: Vec<JoinHandle<()>>,
) -> Result<(), CloseError> {
    for handle in workers {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task did not finish cleanly");
        }
    }

    let abandoned = shared.queue.clear();
    if abandoned > 0 {
        shared
            .counters
            .abandoned
            .fetch_add(abandoned as u64, Ordering::Relaxed);
        warn!(abandoned, "discarded buffered jobs at shutdown");
    }

    let outcome = {
        let _no_direct_calls = shared.direct.write().await;
        shared.backend.close().await.map_err(|e| {
            error!(error = %e, "failed to release backend");
            CloseError {
                source: Arc::new(e),
            }
        })
    };

    shared.set_state(PipelineState::Closed);
    let stats = shared.stats();
    info!(
        succeeded = stats.succeeded,
        exhausted = stats.exhausted,
        dropped_retries = stats.dropped_retries,
        abandoned = stats.abandoned,
        "pipeline closed"
    );
    outcome
}

/// A bounded queue feeding a pool of workers that execute jobs against a
/// shared [`Backend`], with retries and coordinated shutdown.
///
/// All methods take `&self`; wrap the pipeline in an [`Arc`] to share it
/// between producers.
pub struct Pipeline<B: Backend> {
    shared: Arc<Shared<B>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<B: Backend> Pipeline<B> {
    /// Normalizes `config`, runs [`Backend::init`], then starts the workers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Init`] if initialization fails; no worker is
    /// started in that case.
    pub async fn open(config: PipelineConfig, backend: B) -> Result<Self, PipelineError> {
        let config = config.normalized(B::DEFAULT_WORKERS);
        backend.init().await.map_err(PipelineError::Init)?;

        let shared = Arc::new(Shared {
            backend: Arc::new(backend),
            queue: BoundedQueue::new(config.capacity),
            retry: RetryScheduler::new(RetryPolicy::new(config.max_attempts, config.backoff_base)),
            config,
            cancel: CancellationToken::new(),
            counters: Counters::default(),
            state: AtomicU8::new(PipelineState::Open as u8),
            next_id: AtomicU64::new(0),
            direct: RwLock::new(()),
        });

        let workers = (0..shared.config.workers)
            .map(|id| worker::spawn(id, Arc::clone(&shared)))
            .collect();

        info!(
            capacity = shared.config.capacity,
            workers = shared.config.workers,
            max_attempts = shared.config.max_attempts,
            backoff_base = ?shared.config.backoff_base,
            job_timeout = ?shared.config.job_timeout,
            "pipeline open"
        );

        Ok(Self {
            shared,
            lifecycle: Mutex::new(Lifecycle::Running(workers)),
        })
    }

    /// Queues `payload`, waiting for a free slot while the queue is full.
    ///
    /// This is the backpressure path: a saturated pipeline slows its
    /// producers down rather than buffering without bound.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Closed`] once [`close`](Self::close) has begun,
    /// including for callers that were already waiting.
    pub async fn submit(&self, payload: B::Payload) -> Result<(), SubmitError> {
        let job = self.shared.new_job(payload);
        let id = job.id();
        self.shared.queue.enqueue(job).await?;
        Counters::bump(&self.shared.counters.submitted);
        debug!(job = id, "job submitted");
        Ok(())
    }

    /// Submits each payload in turn with [`submit`](Self::submit).
    ///
    /// # Errors
    ///
    /// Stops at the first rejected payload; earlier ones stay queued.
    pub async fn submit_many<I>(&self, payloads: I) -> Result<(), SubmitError>
    where
        I: IntoIterator<Item = B::Payload>,
    {
        for payload in payloads {
            self.submit(payload).await?;
        }
        Ok(())
    }

    /// Queues `payload` only if a slot is free right now. Never waits.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Full`] or [`SubmitError::Closed`]; the payload is
    /// dropped either way.
    pub fn try_submit(&self, payload: B::Payload) -> Result<(), SubmitError> {
        let job = self.shared.new_job(payload);
        self.shared.queue.try_enqueue(job)?;
        Counters::bump(&self.shared.counters.submitted);
        Ok(())
    }

    /// Executes `payload` right away on the caller's task, bypassing the
    /// queue, retries and the per-job deadline.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotOpen`] once shutdown has begun, otherwise the
    /// backend's own error.
    pub async fn execute_direct(&self, payload: &B::Payload) -> Result<B::Output, PipelineError> {
        let _guard = self.shared.direct.read().await;
        match self.shared.state() {
            PipelineState::Open => Ok(self.shared.backend.execute(payload).await?),
            state => Err(PipelineError::NotOpen(state)),
        }
    }

    /// Shuts the pipeline down and releases the backend.
    ///
    /// 1. Cancellation is broadcast to workers and pending backoff waits.
    /// 2. The queue closes; new and waiting submissions fail.
    /// 3. Every worker is awaited. Under [`ShutdownMode::Drain`] they first
    ///    finish the buffered jobs; under [`ShutdownMode::Abandon`] those are
    ///    discarded.
    /// 4. [`Backend::close`] runs exactly once.
    ///
    /// Safe to call any number of times, concurrently or not: later callers
    /// wait for the first one and receive the same outcome. The teardown runs
    /// on its own task, so dropping a `close` future (a timeout, a `select!`)
    /// does not cut it short; the next call picks it up where it is.
    ///
    /// [`ShutdownMode::Drain`]: crate::config::ShutdownMode::Drain
    /// [`ShutdownMode::Abandon`]: crate::config::ShutdownMode::Abandon
    ///
    /// # Errors
    ///
    /// Only a failure to release the backend is reported. Discarded jobs are
    /// counted in [`stats`](Self::stats) and logged, not returned.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut lifecycle = self.lifecycle.lock().await;
        loop {
            match &mut *lifecycle {
                Lifecycle::Closed(outcome) => return outcome.clone(),
                Lifecycle::Running(workers) => {
                    let workers = std::mem::take(workers);
                    let shared = &self.shared;
                    shared.set_state(PipelineState::Closing);
                    info!(
                        queued = shared.queue.len(),
                        mode = ?shared.config.shutdown,
                        "pipeline closing"
                    );

                    shared.cancel.cancel();
                    shared.queue.close();

                    let teardown = tokio::spawn(shutdown(Arc::clone(shared), workers));
                    *lifecycle = Lifecycle::Closing(teardown);
                }
                Lifecycle::Closing(teardown) => {
                    let outcome = teardown.await.unwrap_or_else(|e| {
                        error!(error = %e, "shutdown task failed");
                        Err(CloseError {
                            source: Arc::new(BackendError::failed(format!(
                                "shutdown task failed: {e}"
                            ))),
                        })
                    });
                    *lifecycle = Lifecycle::Closed(outcome);
                }
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// The normalized configuration in effect.
    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Jobs currently buffered.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        if self.shared.state() == PipelineState::Open {
            // Without this, idle workers would wait on the queue forever.
            debug!("pipeline dropped without close; stopping workers");
            self.shared.cancel.cancel();
            self.shared.queue.close();
        }
    }
}

impl<B: Backend> fmt::Debug for Pipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}
