//! The worker loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AttemptError, Counters, Shared};
use crate::backend::Backend;
use crate::config::ShutdownMode;
use crate::job::Job;
use crate::retry::RetryOutcome;
use crate::supervise::{Fault, spawn_guarded};

pub(super) fn spawn<B: Backend>(id: usize, shared: Arc<Shared<B>>) -> JoinHandle<()> {
    spawn_guarded(format!("worker-{id}"), run(id, shared))
}

/// Pulls jobs one at a time until the queue is closed and empty, or until
/// cancellation fires when the pipeline abandons on shutdown.
async fn run<B: Backend>(id: usize, shared: Arc<Shared<B>>) {
    debug!(worker = id, "worker started");
    let abandon_on_cancel = shared.config.shutdown == ShutdownMode::Abandon;

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled(), if abandon_on_cancel => None,
            job = shared.queue.dequeue() => job,
        };
        let Some(job) = next else {
            break;
        };

        shared.counters.active.fetch_add(1, Ordering::AcqRel);
        process(id, &shared, job).await;
        shared.counters.active.fetch_sub(1, Ordering::AcqRel);
    }

    debug!(worker = id, "worker stopped");
}

async fn process<B: Backend>(worker: usize, shared: &Shared<B>, job: Job<B::Payload>) {
    let (id, attempt) = (job.id(), job.attempt());
    let counters = &shared.counters;

    let err = match shared.attempt(&job).await {
        Ok(()) => {
            Counters::bump(&counters.succeeded);
            debug!(worker, job = id, attempt, "job succeeded");
            return;
        }
        Err(err) => err,
    };

    Counters::bump(&counters.failed_attempts);
    match &err {
        AttemptError::Fault(Fault::Panicked(_)) => Counters::bump(&counters.panics),
        AttemptError::Fault(Fault::TimedOut(_)) => Counters::bump(&counters.timeouts),
        _ => {}
    }
    warn!(worker, job = id, attempt, error = %err, "attempt failed");

    match shared.retry.schedule(job, &shared.queue, &shared.cancel).await {
        RetryOutcome::Requeued { attempt, delay } => {
            Counters::bump(&counters.retried);
            debug!(worker, job = id, attempt, ?delay, "job requeued");
        }
        RetryOutcome::Exhausted => {
            Counters::bump(&counters.exhausted);
            warn!(
                worker,
                job = id,
                attempts = attempt.saturating_add(1),
                "retries exhausted; job discarded"
            );
        }
        RetryOutcome::Dropped => {
            Counters::bump(&counters.dropped_retries);
            warn!(worker, job = id, "queue full; retry dropped");
        }
        RetryOutcome::Abandoned => {
            Counters::bump(&counters.abandoned);
            debug!(worker, job = id, "retry abandoned by shutdown");
        }
    }
}
