//! Supervised tasks: run work so that a panic or a hang becomes a value.
//!
//! Every concurrent unit the pipeline starts goes through this module:
//!
//! - [`run_supervised`] executes one attempt as its own Tokio task under a
//!   deadline and reports a panic or overrun as a [`Fault`].
//! - [`spawn_guarded`] starts a long-lived task (a worker loop) and logs a
//!   panic instead of letting it vanish with the `JoinHandle`.

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info_span};

/// An abnormal end of a supervised unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("panicked: {0}")]
    Panicked(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("task was cancelled before completing")]
    Cancelled,
}

/// Runs `work` on its own task and waits at most `deadline` for it.
///
/// On overrun the task is aborted and then awaited, so this returns only once
/// the work has actually stopped. Work stuck in a blocking call holds the
/// caller until that call returns.
///
/// # Errors
///
/// - [`Fault::Panicked`] with the panic message if `work` panics.
/// - [`Fault::TimedOut`] if `deadline` elapses first.
/// - [`Fault::Cancelled`] if the runtime cancels the task (e.g. on shutdown).
pub async fn run_supervised<F>(work: F, deadline: Duration) -> Result<F::Output, Fault>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = tokio::spawn(work);

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(Fault::Panicked(panic_message(join_err.into_panic())))
        }
        Ok(Err(_)) => Err(Fault::Cancelled),
        Err(_elapsed) => {
            handle.abort();
            // Abort only lands at the next `.await`.
            let _ = handle.await;
            Err(Fault::TimedOut(deadline))
        }
    }
}

/// Spawns a fire-and-forget task whose panic is logged under `name`.
///
/// Awaiting the returned handle never yields a panic error.
pub fn spawn_guarded<F>(name: impl Into<String>, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let span = info_span!("task", name = %name);

    tokio::spawn(
        async move {
            if let Err(join_err) = tokio::spawn(work).await {
                if join_err.is_panic() {
                    let message = panic_message(join_err.into_panic());
                    error!(task = %name, panic = %message, "task panicked");
                }
            }
        }
        .instrument(span),
    )
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_owned(),
            Err(_) => "non-string panic payload".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    const LONG: Duration = Duration::from_secs(5);

    async fn explode(message: &'static str) {
        panic!("{message}")
    }

    #[tokio::test]
    async fn returns_output_of_healthy_work() {
        let out = run_supervised(async { 21 * 2 }, LONG).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn str_panic_becomes_fault() {
        let out = run_supervised(explode("backend exploded"), LONG).await;
        assert_eq!(out, Err(Fault::Panicked("backend exploded".into())));
    }

    #[tokio::test]
    async fn formatted_panic_keeps_message() {
        let code = 7;
        let out = run_supervised(
            async move {
                if code != 0 {
                    panic!("exit code {code}");
                }
            },
            LONG,
        )
        .await;
        assert_eq!(out, Err(Fault::Panicked("exit code 7".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_is_a_timeout_and_aborts_the_task() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let out = run_supervised(
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
            },
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(out, Err(Fault::TimedOut(Duration::from_secs(1))));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst), "aborted task must not resume");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_waits_for_blocking_work_to_stop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        let out = run_supervised(
            async move {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
            },
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(out, Err(Fault::TimedOut(Duration::from_millis(20))));
        assert!(stopped.load(Ordering::SeqCst), "work still running after timeout");
    }

    #[tokio::test]
    async fn guarded_spawn_swallows_panic() {
        let handle = spawn_guarded("doomed", explode("boom"));
        assert!(handle.await.is_ok());
    }

    #[test]
    fn fault_messages() {
        assert_eq!(Fault::Panicked("x".into()).to_string(), "panicked: x");
        assert_eq!(
            Fault::TimedOut(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
    }
}
