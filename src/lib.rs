//! # spool
//!
//! Bounded, retrying, gracefully-drainable async job pipelines in front of a
//! backend resource.
//!
//! A [`Pipeline`] owns a fixed-capacity queue, a pool of workers, a retry
//! scheduler with exponential backoff and a one-shot shutdown sequence. The
//! resource behind it (a database connection, a key-value store, a file) is
//! reached only through the [`Backend`] trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spool::{BackendError, FnBackend, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = FnBackend::new(|cmd: &String| {
//!         let cmd = cmd.clone();
//!         async move {
//!             println!("executing {cmd}");
//!             Ok::<_, BackendError>(())
//!         }
//!     });
//!
//!     let pipeline = Pipeline::open(PipelineConfig::default().with_workers(4), backend).await?;
//!     pipeline.submit("SET greeting hello".to_owned()).await?;
//!     pipeline.close().await?;
//!     Ok(())
//! }
//! ```

// ── Building blocks ───────────────────────────────────────────────────────────
pub mod job;
pub mod queue;
pub mod retry;
pub mod supervise;

// ── Pipeline and its collaborators ────────────────────────────────────────────
pub mod backend;
pub mod config;
pub mod pipeline;
pub mod sink;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use backend::{Backend, BackendError, FileBackend, FnBackend};
pub use config::{ConfigError, ConfigHandle, PipelineConfig, Settings, ShutdownMode};
pub use pipeline::{
    AttemptError, CloseError, Pipeline, PipelineError, PipelineState, PipelineStats, SubmitError,
};
pub use sink::LogSink;
