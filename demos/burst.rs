//! Pushes a burst of commands from several producers through a pipeline whose
//! backend fails now and then, and mirrors progress into a log file.
//!
//! ```text
//! RUST_LOG=spool=debug cargo run --example burst
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use spool::sink::{Level, LogSink};
use spool::{BackendError, FnBackend, Pipeline, PipelineConfig};
use tracing_subscriber::EnvFilter;

const PRODUCERS: u32 = 10;
const JOBS_PER_PRODUCER: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "spool=info".into()))
        .init();

    let log_dir = std::env::temp_dir().join("spool-burst");
    let sink = Arc::new(LogSink::open(log_dir.join("burst.log"), 256).await?);

    // Every seventh call fails, which exercises the retry path.
    let calls = Arc::new(AtomicU64::new(0));
    let backend = {
        let calls = Arc::clone(&calls);
        FnBackend::new(move |cmd: &String| {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            let cmd = cmd.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if n % 7 == 3 {
                    return Err(BackendError::failed(format!("transient error on {cmd}")));
                }
                Ok(())
            }
        })
    };

    let config = PipelineConfig::default()
        .with_capacity(10)
        .with_workers(4)
        .with_backoff_base(Duration::from_millis(20));
    let pipeline = Arc::new(Pipeline::open(config, backend).await?);
    sink.info("burst started");

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let pipeline = Arc::clone(&pipeline);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                for n in 0..JOBS_PER_PRODUCER {
                    let cmd = format!("INCR counter:{p}:{n}");
                    if let Err(e) = pipeline.submit(cmd).await {
                        sink.error(format!("producer {p} stopped: {e}"));
                        return;
                    }
                }
                let trace_id = format!("producer-{p}");
                sink.log(Level::Info, Some(trace_id.as_str()), "done");
            })
        })
        .collect();

    for producer in producers {
        producer.await?;
    }

    // Give pending retries a chance to land before draining.
    tokio::time::sleep(Duration::from_millis(500)).await;
    pipeline.close().await?;

    let stats = pipeline.stats();
    sink.info(format!("burst finished: {}", serde_json::to_string(&stats)?));
    sink.close().await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("log written to {}", sink.path().display());
    Ok(())
}
