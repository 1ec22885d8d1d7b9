//! `resultbus run`: execute the suite and publish every result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pipeline::{
    config_paths_for, Broker, RunId, RunSummary, TestCase, TestStatus, TestSuiteConfig, Timestamp,
};
use probe::ReqwestProbe;
use runner::{ExecutorConfig, PublishReport, ResultPublisher, RunOutcome, TestExecutor};

use crate::args::{RunArgs, SuiteArgs};
use crate::environment;

/// Returns `Ok(true)` when every test passed.
pub async fn run(args: RunArgs, cancel: CancellationToken) -> anyhow::Result<bool> {
    let context = environment::run_context();
    let cases = load_cases(args.suite.config.as_deref(), &context.environment)?;
    let run_id = RunId::generate(Timestamp::now());
    info!(
        run_id = %run_id,
        environment = %context.environment,
        runner = %context.runner,
        cases = cases.len(),
        "Starting test run"
    );

    let started = Instant::now();
    let outcome = execute(&args.suite, &run_id, cases, &cancel).await?;

    match args.broker.connect()? {
        Some(broker) => {
            let broker: Arc<dyn Broker> = Arc::new(broker);
            let mut publisher = ResultPublisher::new(broker, args.broker.topic()?);
            if let Some(ttl) = args.message_ttl_secs {
                publisher = publisher.with_time_to_live(Duration::from_secs(ttl));
            }
            let report = publisher.publish_batch(&outcome.results, &cancel).await;
            log_publish_report(&report);
        }
        None => warn!(
            "SERVICE_BUS_NAMESPACE or SERVICE_BUS_SAS_TOKEN not set; skipping result publishing"
        ),
    }

    let summary = RunSummary::from_results(run_id, outcome.results, started.elapsed())
        .with_context(context);
    finish(&summary, &args.suite.output).await?;
    Ok(summary.overall_pass && !outcome.cancelled)
}

/// Loads and validates the suite from `explicit` or the locations searched
/// in `environment`.
pub(crate) fn load_cases(
    explicit: Option<&Path>,
    environment: &str,
) -> anyhow::Result<Vec<TestCase>> {
    let suite = match explicit {
        Some(path) => TestSuiteConfig::load(path)?,
        None => {
            let candidates: Vec<PathBuf> = config_paths_for(environment)
                .iter()
                .map(PathBuf::from)
                .collect();
            TestSuiteConfig::load_first_available(&candidates)?
        }
    };
    suite.into_cases().context("invalid test configuration")
}

pub(crate) async fn execute(
    suite: &SuiteArgs,
    run_id: &RunId,
    cases: Vec<TestCase>,
    cancel: &CancellationToken,
) -> anyhow::Result<RunOutcome> {
    let probe = ReqwestProbe::new().context("failed to build HTTP probe")?;
    let executor = TestExecutor::new(
        Arc::new(probe),
        ExecutorConfig {
            concurrency: suite.concurrency,
            run_timeout: suite.run_timeout(),
        },
    );
    Ok(executor.run(run_id, cases, cancel).await)
}

pub(crate) fn log_publish_report(report: &PublishReport) {
    for (test_name, e) in &report.failed {
        error!(test_name = %test_name, error = %e, "Result was not published");
    }
    if report.skipped > 0 {
        warn!(skipped = report.skipped, "Publishing cancelled before every result was sent");
    }
    info!(published = report.published.len(), "Results published");
}

/// Writes the summary file and prints the human-readable report.
pub(crate) async fn finish(summary: &RunSummary, output: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(summary).context("failed to serialise run summary")?;
    tokio::fs::write(output, json)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(path = %output.display(), "Run summary written");
    print!("{}", render_summary(summary));
    Ok(())
}

fn render_summary(summary: &RunSummary) -> String {
    let rule = "=".repeat(50);
    let mut out = format!(
        "\n{rule}\nTEST SUMMARY\n{rule}\n\
         Run ID:       {}\n\
         Runner:       {} ({})\n\
         Total Tests:  {}\n\
         Passed:       {}\n\
         Failed:       {}\n\
         Errored:      {}\n\
         Success Rate: {:.1}%\n\
         Duration:     {}ms\n\
         Overall:      {}\n",
        summary.run_id,
        summary.context.runner,
        summary.context.environment,
        summary.total_tests,
        summary.passed_tests,
        summary.failed_tests,
        summary.errored_tests,
        summary.success_rate,
        summary.total_duration_ms,
        if summary.overall_pass { "PASS" } else { "FAIL" },
    );

    let not_passed: Vec<_> = summary
        .test_results
        .iter()
        .filter(|r| r.status() != TestStatus::Pass)
        .collect();
    if !not_passed.is_empty() {
        out.push_str("\nFailed tests:\n");
        for result in not_passed {
            out.push_str(&format!(
                "  - {} [{}]: {}\n",
                result.test_name(),
                result.status(),
                result.error_detail().unwrap_or("unknown error")
            ));
        }
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use pipeline::{RunContext, TestName, TestResult};

    use super::*;

    fn summary() -> RunSummary {
        let run_id = RunId::new("test-20250101-120000-abcdef12").unwrap();
        let results = vec![
            TestResult::passed(
                run_id.clone(),
                TestName::new("health").unwrap(),
                200,
                Duration::from_millis(10),
                Timestamp::now(),
            ),
            TestResult::errored(
                run_id.clone(),
                TestName::new("orders").unwrap(),
                "Connection failed: refused",
                Duration::from_millis(3),
                Timestamp::now(),
            ),
        ];
        RunSummary::from_results(run_id, results, Duration::from_millis(25)).with_context(
            RunContext {
                environment: "local-machine".into(),
                runner: "Local Machine".into(),
                ..RunContext::default()
            },
        )
    }

    #[test]
    fn rendered_summary_lists_failures() {
        let text = render_summary(&summary());
        assert!(text.contains("Runner:       Local Machine (local-machine)"));
        assert!(text.contains("Total Tests:  2"));
        assert!(text.contains("Success Rate: 50.0%"));
        assert!(text.contains("Overall:      FAIL"));
        assert!(text.contains("  - orders [error]: Connection failed: refused"));
        assert!(!text.contains("  - health"));
    }

    #[tokio::test]
    async fn summary_file_is_valid_json() {
        let path = std::env::temp_dir().join(format!(
            "resultbus-summary-{}.json",
            std::process::id()
        ));
        finish(&summary(), &path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(written["total_tests"], 2);
        assert_eq!(written["overall_pass"], false);
        assert_eq!(written["test_results"][1]["status"], "error");
        assert_eq!(written["environment"], "local-machine");
        assert_eq!(written["git_commit"], "unknown");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = load_cases(Some(Path::new("/definitely/not/here.json")), "local-machine")
            .unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here.json"));
    }
}
