//! Aggregates computed over the results of one run.
//!
//! [`RunSummary`] is the producer-side report (CI log, `test_results.json`,
//! exit code). [`NotificationSummary`] is the consumer-side payload handed to
//! the [`crate::Notifier`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RunId, TestResult, TestStatus, Timestamp};

/// Success rate at or above which a run with failures is only a warning.
const WARNING_SUCCESS_RATE: f64 = 80.0;

/// Placeholder for metadata the run could not determine.
pub const UNKNOWN: &str = "unknown";

/// Where a run executed and what it tested.
///
/// Filled by the binary from its environment; every field falls back to
/// [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Detected execution environment, e.g. `github-actions`.
    pub environment: String,
    /// Human-readable label for `environment`.
    pub runner: String,
    /// `GITHUB_SHA`.
    pub git_commit: String,
    /// `GITHUB_REF`.
    pub git_branch: String,
    /// `GITHUB_RUN_ID`.
    pub github_run_id: String,
    /// `GITHUB_REPOSITORY`.
    pub github_repository: String,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            environment: UNKNOWN.into(),
            runner: UNKNOWN.into(),
            git_commit: UNKNOWN.into(),
            git_branch: UNKNOWN.into(),
            github_run_id: UNKNOWN.into(),
            github_repository: UNKNOWN.into(),
        }
    }
}

/// Producer-side summary of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub timestamp: Timestamp,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub errored_tests: usize,
    /// Percentage in `[0, 100]`; `0` for an empty run.
    pub success_rate: f64,
    pub total_duration_ms: u64,
    /// `true` only when every test passed.
    pub overall_pass: bool,
    /// Serialised inline, next to the counts.
    #[serde(flatten)]
    pub context: RunContext,
    pub test_results: Vec<TestResult>,
}

impl RunSummary {
    pub fn from_results(
        run_id: RunId,
        results: Vec<TestResult>,
        total_duration: Duration,
    ) -> Self {
        let total_tests = results.len();
        let count = |status| results.iter().filter(|r| r.status() == status).count();
        let passed_tests = count(TestStatus::Pass);
        let failed_tests = count(TestStatus::Fail);
        let errored_tests = count(TestStatus::Error);

        Self {
            run_id,
            timestamp: Timestamp::now(),
            total_tests,
            passed_tests,
            failed_tests,
            errored_tests,
            success_rate: success_rate(passed_tests, total_tests),
            total_duration_ms: u64::try_from(total_duration.as_millis()).unwrap_or(u64::MAX),
            overall_pass: passed_tests == total_tests,
            context: RunContext::default(),
            test_results: results,
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }
}

fn success_rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64 * 100.0
    }
}

// ---------------------------------------------------------------------------

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Nothing failed.
    Success,
    /// Some failures, success rate still at least 80%.
    Warning,
    Error,
}

/// One failing test in a [`NotificationSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub test_name: String,
    pub reason: String,
}

/// Payload handed to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub run_id: RunId,
    pub failed_count: usize,
    pub total_count: usize,
    /// Ordered by result timestamp, then test name.
    pub failures: Vec<FailureDetail>,
    pub alert_level: AlertLevel,
}

impl NotificationSummary {
    /// Summarises the results of `run_id` seen so far.
    ///
    /// `fail` and `error` both count as failures.
    pub fn from_results(run_id: RunId, results: &[TestResult]) -> Self {
        let mut failing: Vec<&TestResult> = results.iter().filter(|r| !r.is_pass()).collect();
        failing.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.test_name().cmp(b.test_name()))
        });

        let failures: Vec<FailureDetail> = failing
            .into_iter()
            .map(|r| FailureDetail {
                test_name: r.test_name().to_string(),
                reason: failure_reason(r),
            })
            .collect();

        let total_count = results.len();
        let failed_count = failures.len();
        let alert_level = if failed_count == 0 {
            AlertLevel::Success
        } else if success_rate(total_count - failed_count, total_count) >= WARNING_SUCCESS_RATE {
            AlertLevel::Warning
        } else {
            AlertLevel::Error
        };

        Self {
            run_id,
            failed_count,
            total_count,
            failures,
            alert_level,
        }
    }
}

fn failure_reason(result: &TestResult) -> String {
    match (result.error_detail(), result.observed_status_code()) {
        (Some(detail), _) => detail.to_string(),
        (None, Some(code)) => format!("status {code}"),
        (None, None) => "No error message".to_string(),
    }
}
