//! Runtime counters for a pipeline.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time snapshot of a pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Fresh jobs accepted by `submit`/`try_submit`.
    pub submitted: u64,
    /// Jobs that eventually succeeded.
    pub succeeded: u64,
    /// Individual attempts that failed (backend error, panic or timeout).
    pub failed_attempts: u64,
    /// Failed attempts that were put back in the queue.
    pub retried: u64,
    /// Jobs discarded after reaching the attempt ceiling.
    pub exhausted: u64,
    /// Retries lost because the queue was full at re-submission time.
    pub dropped_retries: u64,
    /// Attempts that panicked inside the backend.
    pub panics: u64,
    /// Attempts that overran the per-job deadline.
    pub timeouts: u64,
    /// Jobs discarded by shutdown (buffered, or waiting out a backoff).
    pub abandoned: u64,
    /// Jobs currently buffered in the queue.
    pub queued: usize,
    /// Jobs currently held by a worker (executing or backing off).
    pub active: usize,
}

impl PipelineStats {
    /// Jobs accepted but not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.queued + self.active
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) submitted: AtomicU64,
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed_attempts: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) exhausted: AtomicU64,
    pub(crate) dropped_retries: AtomicU64,
    pub(crate) panics: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) abandoned: AtomicU64,
    pub(crate) active: AtomicUsize,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued: usize) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            dropped_retries: self.dropped_retries.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            queued,
            active: self.active.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.submitted);
        Counters::bump(&counters.succeeded);
        counters.active.fetch_add(1, Ordering::AcqRel);

        let stats = counters.snapshot(3);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.in_flight(), 4);
    }

    #[test]
    fn serializes_to_flat_json() {
        let stats = PipelineStats {
            dropped_retries: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["dropped_retries"], 2);
        assert_eq!(json["queued"], 0);
    }
}
