//! Competing-consumer worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ResultProcessor;

/// Shape of the competing-consumer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of concurrent consumers; at least one is always started.
    pub workers: usize,
    /// How long one receive waits for a message.
    pub receive_wait: Duration,
    /// Pause after an empty or failed receive.
    pub idle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            receive_wait: Duration::from_secs(5),
            idle_backoff: Duration::from_millis(100),
        }
    }
}

/// Spawns `config.workers` loops that receive and handle messages until
/// `shutdown` is cancelled.
///
/// Shutdown interrupts a pending receive but never a message being handled,
/// so a reservation is never left behind in the processed marker.
pub fn spawn_workers(
    processor: Arc<ResultProcessor>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..config.workers.max(1))
        .map(|worker_id| {
            let processor = processor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker_loop(processor, worker_id, config, shutdown).await })
        })
        .collect()
}

async fn worker_loop(
    processor: Arc<ResultProcessor>,
    worker_id: usize,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    info!(worker = worker_id, subscription = %processor.subscription(), "Worker started");
    while !shutdown.is_cancelled() {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = processor.receive(config.receive_wait) => received,
        };

        match received {
            Ok(Some(envelope)) => {
                let outcome = processor.handle(envelope).await;
                debug!(worker = worker_id, ?outcome, "Message handled");
            }
            Ok(None) => idle(&config, &shutdown).await,
            Err(err) => {
                warn!(worker = worker_id, error = %err, "Failed to receive message");
                idle(&config, &shutdown).await;
            }
        }
    }
    info!(worker = worker_id, "Worker stopped");
}

async fn idle(config: &WorkerConfig, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = sleep(config.idle_backoff) => {}
    }
}
