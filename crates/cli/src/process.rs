//! `resultbus process`: competing consumers on the results subscription.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notifier::{DedupingNotifier, LogNotifier, WebhookNotifier};
use pipeline::Notifier;
use runner::{
    spawn_workers, InMemoryProcessedMarker, InMemoryResultStore, ResultProcessor, WorkerConfig,
};

use crate::args::{ConsumerArgs, ProcessArgs};

pub async fn process(args: ProcessArgs, shutdown: CancellationToken) -> anyhow::Result<()> {
    let topic = args.broker.topic()?;
    let subscription = args.consumer.subscription()?;
    let broker = args
        .broker
        .connect()?
        .context("process requires SERVICE_BUS_NAMESPACE and SERVICE_BUS_SAS_TOKEN")?
        .with_subscription(topic, subscription.clone());

    let processor = Arc::new(ResultProcessor::new(
        Arc::new(broker),
        build_notifier(&args.consumer)?,
        Arc::new(InMemoryResultStore::new()),
        Arc::new(InMemoryProcessedMarker::new()),
        subscription.clone(),
    ));

    info!(subscription = %subscription, workers = args.consumer.workers, "Starting result processors");
    let workers = spawn_workers(
        processor.clone(),
        WorkerConfig {
            workers: args.consumer.workers,
            receive_wait: Duration::from_secs(args.receive_wait_secs),
            ..WorkerConfig::default()
        },
        shutdown.clone(),
    );

    shutdown.cancelled().await;
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
    info!("Result processors stopped");

    if let Err(e) = processor.inspect_dead_letters().await {
        warn!(error = %e, "Could not inspect dead letters");
    }
    Ok(())
}

/// Webhook notifier when a URL is configured, log-only otherwise; both
/// suppress repeated dedup keys.
pub(crate) fn build_notifier(args: &ConsumerArgs) -> anyhow::Result<Arc<dyn Notifier>> {
    Ok(match &args.slack_webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url).context("invalid webhook notifier")?;
            Arc::new(DedupingNotifier::new(webhook))
        }
        None => {
            info!("SLACK_WEBHOOK_URL not set; notifications will be logged only");
            Arc::new(DedupingNotifier::new(LogNotifier))
        }
    })
}
