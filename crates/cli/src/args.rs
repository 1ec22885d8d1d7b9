//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use broker::{ServiceBusBroker, ServiceBusConfig};
use pipeline::{SubscriptionName, TopicName};

#[derive(Debug, Parser)]
#[command(name = "resultbus")]
#[command(about = "Runs API checks and delivers their results over a message broker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint; spans are exported when set
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the test suite and publish every result
    Run(RunArgs),
    /// Consume results from the subscription until interrupted
    Process(ProcessArgs),
    /// Run producer and consumers in one process over an in-memory broker
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SuiteArgs {
    /// Test suite file; the default locations are searched when omitted
    #[arg(short, long, env = "TEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Checks in flight at once
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Upper bound on the whole run, in seconds
    #[arg(long, default_value_t = 600)]
    pub run_timeout_secs: u64,

    /// Where the run summary is written
    #[arg(long, default_value = "test_results.json")]
    pub output: PathBuf,
}

impl SuiteArgs {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    /// Service Bus namespace name or endpoint
    #[arg(long, env = "SERVICE_BUS_NAMESPACE")]
    pub namespace: Option<String>,

    /// Pre-issued SAS authorization value
    #[arg(long, env = "SERVICE_BUS_SAS_TOKEN", hide_env_values = true)]
    pub sas_token: Option<String>,

    /// Topic results are published to
    #[arg(long, env = "RESULTS_TOPIC", default_value = "api-test-results")]
    pub topic: String,

    /// Broker request timeout, in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl BrokerArgs {
    pub fn topic(&self) -> anyhow::Result<TopicName> {
        TopicName::new(&self.topic).context("topic name must not be empty")
    }

    /// Builds the Service Bus adapter, or `None` when the namespace or token
    /// is not configured.
    pub fn connect(&self) -> anyhow::Result<Option<ServiceBusBroker>> {
        let (Some(namespace), Some(sas_token)) = (&self.namespace, &self.sas_token) else {
            return Ok(None);
        };
        let broker = ServiceBusBroker::new(ServiceBusConfig {
            namespace: namespace.clone(),
            sas_token: sas_token.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
        .context("invalid Service Bus configuration")?;
        Ok(Some(broker))
    }
}

#[derive(Debug, Clone, Args)]
pub struct ConsumerArgs {
    /// Subscription the processor pool consumes
    #[arg(long, env = "RESULTS_SUBSCRIPTION", default_value = "results-processor")]
    pub subscription: String,

    /// Competing consumers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Incoming webhook for failure notifications; notifications are only
    /// logged when unset
    #[arg(long, env = "SLACK_WEBHOOK_URL", hide_env_values = true)]
    pub slack_webhook_url: Option<String>,
}

impl ConsumerArgs {
    pub fn subscription(&self) -> anyhow::Result<SubscriptionName> {
        SubscriptionName::new(&self.subscription).context("subscription name must not be empty")
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Time-to-live stamped on published results, in seconds
    #[arg(long)]
    pub message_ttl_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub consumer: ConsumerArgs,

    /// Seconds one receive waits for a message
    #[arg(long, default_value_t = 30)]
    pub receive_wait_secs: u64,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub suite: SuiteArgs,

    #[command(flatten)]
    pub consumer: ConsumerArgs,

    /// Deliveries allowed before a message is dead-lettered
    #[arg(long, default_value_t = 10)]
    pub max_delivery_count: u32,

    /// Lease granted by each receive, in seconds
    #[arg(long, default_value_t = 60)]
    pub lock_duration_secs: u64,

    /// Longest time to wait for the subscription to drain, in seconds
    #[arg(long, default_value_t = 60)]
    pub drain_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["resultbus", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.suite.concurrency, 4);
        assert_eq!(args.suite.output, PathBuf::from("test_results.json"));
        assert_eq!(args.message_ttl_secs, None);
    }

    #[test]
    fn broker_is_optional_without_credentials() {
        let args = BrokerArgs {
            namespace: Some("mybus".into()),
            sas_token: None,
            topic: "api-test-results".into(),
            request_timeout_secs: 30,
        };
        assert!(args.connect().unwrap().is_none());
    }

    #[test]
    fn simulate_accepts_policy_flags() {
        let cli = Cli::try_parse_from([
            "resultbus",
            "--log-format",
            "json",
            "simulate",
            "--max-delivery-count",
            "3",
            "--workers",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.max_delivery_count, 3);
        assert_eq!(args.consumer.workers, 2);
    }
}
