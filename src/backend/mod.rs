//! The backend boundary: the only capability a pipeline needs from the
//! resource it feeds.
//!
//! A [`Backend`] accepts an opaque payload and reports success or failure.
//! How it talks to its resource (SQL statements, key-value commands, file
//! writes) is none of the pipeline's business.
//!
//! ## Provided backends
//!
//! - [`FnBackend`]: wraps an async closure; handy for command-style jobs and
//!   tests.
//! - [`FileBackend`]: appends one line per payload to a file.

use std::future::Future;
use std::marker::PhantomData;

use thiserror::Error;

pub mod file;

pub use file::FileBackend;

/// Why a backend call failed.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Shorthand for [`BackendError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        BackendError::Failed(reason.into())
    }
}

/// A resource that executes units of work.
///
/// Every worker of a pipeline calls [`execute`](Self::execute) on the same
/// instance at the same time, so implementations must be safe under
/// concurrent invocation. The pipeline does not serialize calls for you.
///
/// # Examples
///
/// ```
/// use spool::backend::{Backend, BackendError};
///
/// struct Echo;
///
/// impl Backend for Echo {
///     type Payload = String;
///     type Output = usize;
///
///     async fn execute(&self, line: &String) -> Result<usize, BackendError> {
///         Ok(line.len())
///     }
/// }
/// ```
pub trait Backend: Send + Sync + 'static {
    /// One unit of work. Treated as opaque by the pipeline.
    type Payload: Send + Sync + 'static;

    /// What a direct (queue-bypassing) call returns to its caller. Queued
    /// executions discard it.
    type Output: Send + 'static;

    /// Worker count used when the configuration leaves it unset.
    const DEFAULT_WORKERS: usize = 2;

    /// One-time setup run by [`Pipeline::open`](crate::pipeline::Pipeline::open)
    /// before any worker starts (schema creation, connectivity checks, ...).
    fn init(&self) -> impl Future<Output = Result<(), BackendError>> + Send {
        async { Ok(()) }
    }

    /// Executes a single payload.
    fn execute(
        &self,
        payload: &Self::Payload,
    ) -> impl Future<Output = Result<Self::Output, BackendError>> + Send;

    /// Releases the resource. Called exactly once, after every worker has
    /// exited.
    fn close(&self) -> impl Future<Output = Result<(), BackendError>> + Send {
        async { Ok(()) }
    }
}

/// A [`Backend`] built from an async closure.
///
/// The closure borrows the payload and must return a `'static` future, so copy
/// out whatever the future needs before the `async move` block.
///
/// ```
/// use spool::backend::{BackendError, FnBackend};
///
/// let backend = FnBackend::new(|key: &String| {
///     let key = key.clone();
///     async move {
///         if key.is_empty() {
///             return Err(BackendError::failed("empty key"));
///         }
///         Ok(())
///     }
/// });
/// # let _ = backend;
/// ```
pub struct FnBackend<P, F> {
    f: F,
    _payload: PhantomData<fn(&P)>,
}

impl<P, F, Fut, O> FnBackend<P, F>
where
    F: Fn(&P) -> Fut,
    Fut: Future<Output = Result<O, BackendError>>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

impl<P, F, Fut, O> Backend for FnBackend<P, F>
where
    P: Send + Sync + 'static,
    F: Fn(&P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, BackendError>> + Send + 'static,
    O: Send + 'static,
{
    type Payload = P;
    type Output = O;

    fn execute(&self, payload: &P) -> impl Future<Output = Result<O, BackendError>> + Send {
        (self.f)(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn fn_backend_runs_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend = FnBackend::new(move |n: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = *n;
            async move { Ok::<_, BackendError>(n * 2) }
        });

        backend.init().await.unwrap();
        assert_eq!(backend.execute(&21).await.unwrap(), 42);
        backend.close().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fn_backend_propagates_failure() {
        let backend = FnBackend::new(|_: &()| async {
            Err::<(), _>(BackendError::failed("connection refused"))
        });
        let err = backend.execute(&()).await.unwrap_err();
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn io_errors_convert() {
        let err: BackendError = std::io::Error::other("disk full").into();
        assert!(matches!(err, BackendError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: disk full");
    }
}
