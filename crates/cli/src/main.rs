//! resultbus CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration** — command-line flags, each backed by an
//!    environment variable, plus the JSON test suite.
//! 2. **Wire observability** — configure `tracing-subscriber` with a JSON or
//!    human-readable layer and, when an endpoint is configured, an
//!    OpenTelemetry OTLP exporter. All `tracing` spans and structured events
//!    emitted by every crate in the workspace flow through this layer.
//! 3. **Construct infrastructure** — create the concrete adapters
//!    (`ReqwestProbe`, `ServiceBusBroker` or `InMemoryBroker`,
//!    `WebhookNotifier` or `LogNotifier`) and inject them into the `runner`
//!    orchestration types.
//! 4. **Select mode** — based on the subcommand:
//!    - `run` — execute the suite, publish every result, write the run
//!      summary and exit non-zero when any test did not pass.
//!    - `process` — run a competing-consumer pool on the results
//!      subscription until interrupted.
//!    - `simulate` — both sides in one process over the in-memory broker.

mod args;
mod environment;
mod process;
mod run;
mod simulate;
mod telemetry;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use args::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match telemetry::init(cli.log_format, cli.otlp_endpoint.as_deref()) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("failed to initialise logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let outcome = match cli.command {
        Command::Run(args) => run::run(args, cancel).await,
        Command::Process(args) => process::process(args, cancel).await.map(|()| true),
        Command::Simulate(args) => simulate::simulate(args, cancel).await,
    };

    let code = match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "resultbus failed");
            ExitCode::FAILURE
        }
    };
    telemetry.shutdown();
    code
}

/// Cancels `cancel` on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; shutting down");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });
}
