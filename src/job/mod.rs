//! Units of work flowing through a [`Pipeline`](crate::pipeline::Pipeline).

use std::fmt;
use std::sync::Arc;

/// An immutable unit of work plus its attempt counter.
///
/// The payload sits behind an [`Arc`] so a failed job can be handed back to the
/// queue without requiring `P: Clone`. Only the retry path ever changes
/// `attempt`, and it does so by consuming the job.
pub struct Job<P> {
    id: u64,
    payload: Arc<P>,
    attempt: u32,
}

impl<P> Job<P> {
    pub(crate) fn new(id: u64, payload: P) -> Self {
        Self {
            id,
            payload: Arc::new(payload),
            attempt: 0,
        }
    }

    /// Pipeline-local sequence number, used for log correlation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of retries already made for this job. Starts at 0.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Borrows the opaque payload.
    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub(crate) fn shared_payload(&self) -> Arc<P> {
        Arc::clone(&self.payload)
    }

    /// Consumes the job and returns it with `attempt + 1`.
    pub(crate) fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }
}

impl<P> fmt::Debug for Job<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_at_attempt_zero() {
        let job = Job::new(7, "INSERT INTO logs VALUES (?)");
        assert_eq!(job.id(), 7);
        assert_eq!(job.attempt(), 0);
        assert_eq!(*job.payload(), "INSERT INTO logs VALUES (?)");
    }

    #[test]
    fn next_attempt_increments_by_one_and_keeps_payload() {
        let job = Job::new(1, vec![1u8, 2, 3]).next_attempt().next_attempt();
        assert_eq!(job.attempt(), 2);
        assert_eq!(job.id(), 1);
        assert_eq!(job.payload(), &vec![1, 2, 3]);
    }

    #[test]
    fn debug_does_not_require_debug_payload() {
        struct Opaque;
        let rendered = format!("{:?}", Job::new(3, Opaque));
        assert!(rendered.contains("id: 3"));
        assert!(rendered.contains("attempt: 0"));
    }
}
