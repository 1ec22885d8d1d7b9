//! `resultbus simulate`: the whole pipeline in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use broker::InMemoryBroker;
use pipeline::{DeliveryPolicy, RunId, RunSummary, Timestamp, TopicName};
use runner::{
    spawn_workers, InMemoryProcessedMarker, InMemoryResultStore, ResultProcessor,
    ResultPublisher, WorkerConfig,
};

use crate::args::SimulateArgs;
use crate::environment;
use crate::process::build_notifier;
use crate::run::{execute, finish, load_cases, log_publish_report};

const TOPIC: &str = "api-test-results";

pub async fn simulate(args: SimulateArgs, cancel: CancellationToken) -> anyhow::Result<bool> {
    let context = environment::run_context();
    let cases = load_cases(args.suite.config.as_deref(), &context.environment)?;
    let topic = TopicName::new(TOPIC).context("topic name must not be empty")?;
    let subscription = args.consumer.subscription()?;
    let policy = DeliveryPolicy::new(
        args.max_delivery_count,
        Duration::from_secs(args.lock_duration_secs),
        DeliveryPolicy::default().default_time_to_live,
    )?;

    let broker = Arc::new(InMemoryBroker::new());
    broker.subscribe(&topic, subscription.clone(), policy);

    let processor = Arc::new(ResultProcessor::new(
        broker.clone(),
        build_notifier(&args.consumer)?,
        Arc::new(InMemoryResultStore::new()),
        Arc::new(InMemoryProcessedMarker::new()),
        subscription.clone(),
    ));
    let shutdown = cancel.child_token();
    let workers = spawn_workers(
        processor.clone(),
        WorkerConfig {
            workers: args.consumer.workers,
            receive_wait: Duration::from_millis(200),
            idle_backoff: Duration::from_millis(20),
        },
        shutdown.clone(),
    );

    let run_id = RunId::generate(Timestamp::now());
    info!(run_id = %run_id, cases = cases.len(), "Starting simulated run");
    let started = Instant::now();
    let outcome = execute(&args.suite, &run_id, cases, &cancel).await?;

    let publisher = ResultPublisher::new(broker.clone(), topic);
    let report = publisher.publish_batch(&outcome.results, &cancel).await;
    log_publish_report(&report);

    let drain_timeout = Duration::from_secs(args.drain_timeout_secs);
    let drained = tokio::time::timeout(drain_timeout, async {
        while broker.active_message_count(&subscription) > 0 && !cancel.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = broker.active_message_count(&subscription),
            "Subscription not drained before timeout"
        );
    }

    shutdown.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
    processor.inspect_dead_letters().await?;

    let summary =
        RunSummary::from_results(run_id, outcome.results, started.elapsed()).with_context(context);
    finish(&summary, &args.suite.output).await?;
    Ok(summary.overall_pass && !outcome.cancelled)
}
