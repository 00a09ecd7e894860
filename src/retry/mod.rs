//! Retry with exponential backoff.
//!
//! A failed job is given back to the queue after `backoff_base * 2^attempt`,
//! until its attempt counter reaches `max_attempts`. Re-submission never
//! suspends: if the queue is full at that moment the retry is dropped. Fresh
//! work from producers goes through the blocking
//! [`Pipeline::submit`](crate::pipeline::Pipeline::submit) instead, so the two
//! overflow policies stay visibly separate.
//!
//! Dropped retries are lost. They are counted in
//! [`PipelineStats::dropped_retries`](crate::pipeline::PipelineStats) and
//! logged at `warn`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::job::Job;
use crate::queue::{BoundedQueue, QueueError};

/// Ceiling and pacing for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

/// What to do with a job that just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// How a failed job left the retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back in the queue with the given attempt number.
    Requeued { attempt: u32, delay: Duration },
    /// Attempt ceiling reached; the job is discarded.
    Exhausted,
    /// The queue was full when the backoff elapsed; the job is discarded.
    Dropped,
    /// Shutdown began during the backoff wait; the job is discarded.
    Abandoned,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Delay before re-submitting a job whose attempt number is `attempt`.
    ///
    /// Attempt 0 waits exactly `backoff_base`; each later attempt doubles it.
    /// Saturates at [`Duration::MAX`].
    ///
    /// ```
    /// use std::time::Duration;
    /// use spool::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(5, Duration::from_millis(100));
    /// assert_eq!(policy.backoff(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(800));
    /// ```
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff(attempt))
        }
    }
}

/// Turns failed executions into delayed, best-effort re-submissions.
#[derive(Debug, Clone, Copy)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Handles one failed job: waits out its backoff (or until `cancel` fires)
    /// and re-submits it with the next attempt number.
    ///
    /// Only the calling worker is held up by the wait.
    pub async fn schedule<P>(
        &self,
        job: Job<P>,
        queue: &BoundedQueue<Job<P>>,
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let delay = match self.policy.decide(job.attempt()) {
            RetryDecision::GiveUp => return RetryOutcome::Exhausted,
            RetryDecision::RetryAfter(delay) => delay,
        };

        debug!(job = job.id(), attempt = job.attempt(), ?delay, "backing off");
        tokio::select! {
            _ = cancel.cancelled() => return RetryOutcome::Abandoned,
            _ = tokio::time::sleep(delay) => {}
        }

        match Self::resubmit(job.next_attempt(), queue) {
            Ok(attempt) => RetryOutcome::Requeued { attempt, delay },
            Err(QueueError::Full(_)) => RetryOutcome::Dropped,
            Err(QueueError::Closed(_)) => RetryOutcome::Abandoned,
        }
    }

    /// Non-blocking re-submission. Returns the job's new attempt number.
    ///
    /// # Errors
    ///
    /// Hands the job back inside [`QueueError`] when the queue is full or
    /// closed; the caller decides whether that is a loss.
    pub fn resubmit<P>(
        job: Job<P>,
        queue: &BoundedQueue<Job<P>>,
    ) -> Result<u32, QueueError<Job<P>>> {
        let attempt = job.attempt();
        queue.try_enqueue(job).map(|()| attempt)
    }
}
