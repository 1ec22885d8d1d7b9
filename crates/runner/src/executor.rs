//! Test Executor: runs a suite of HTTP checks with bounded parallelism.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::de::IgnoredAny;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use pipeline::{
    ExecutionError, HttpProbe, ProbeRequest, ProbeResponse, RunId, TestCase, TestResult,
    Timestamp,
};

/// Detail recorded for cases still unfinished when the run deadline passes.
pub const RUN_DEADLINE_EXCEEDED: &str = "run deadline exceeded";

/// Detail recorded when `validate_json` is set and the body does not parse.
pub const INVALID_JSON_RESPONSE: &str = "invalid JSON response";

/// Parallelism and the overall deadline of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of checks in flight at once.
    pub concurrency: usize,
    /// Upper bound on the wall time of a whole run.
    pub run_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            run_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// One result per finished case, in suite order.
    pub results: Vec<TestResult>,
    /// `true` when the run was cancelled before every case finished.
    pub cancelled: bool,
}

/// Runs test cases through an [`HttpProbe`] and classifies the responses.
pub struct TestExecutor {
    probe: Arc<dyn HttpProbe>,
    config: ExecutorConfig,
}

impl TestExecutor {
    pub fn new(probe: Arc<dyn HttpProbe>, config: ExecutorConfig) -> Self {
        Self { probe, config }
    }

    /// Runs every case and returns their results in input order.
    ///
    /// A failing case never stops the others. When the run deadline passes,
    /// every unfinished case yields an `error` result. When `cancel` fires, no
    /// new calls are issued, in-flight calls are abandoned, and unfinished
    /// cases produce no result at all.
    #[instrument(skip_all, fields(run_id = %run_id, cases = cases.len()))]
    pub async fn run(
        &self,
        run_id: &RunId,
        cases: Vec<TestCase>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let deadline = Instant::now() + self.config.run_timeout;
        let expected = cases.len();

        let results: Vec<TestResult> = stream::iter(cases)
            .map(|case| self.run_case(run_id, case, deadline, cancel))
            .buffered(self.config.concurrency.max(1))
            .filter_map(|result| async move { result })
            .collect()
            .await;

        let cancelled = results.len() < expected;
        if cancelled {
            warn!(
                finished = results.len(),
                dropped = expected - results.len(),
                "Run cancelled; unfinished cases dropped"
            );
        }
        RunOutcome { results, cancelled }
    }

    async fn run_case(
        &self,
        run_id: &RunId,
        case: TestCase,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Option<TestResult> {
        if cancel.is_cancelled() {
            return None;
        }
        let started = Instant::now();
        if started >= deadline {
            return Some(deadline_exceeded(run_id, &case, Duration::ZERO));
        }

        let request = ProbeRequest {
            method: case.method,
            url: case.url.clone(),
            timeout: case.timeout,
            body: case.payload.clone(),
        };
        let call = async {
            match tokio::time::timeout(case.timeout, self.probe.send(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutionError::Timeout {
                    after: case.timeout,
                }),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = tokio::time::timeout_at(deadline, call) => outcome,
        };

        let latency = started.elapsed();
        let result = match outcome {
            Ok(outcome) => classify(run_id, &case, outcome, latency),
            Err(_) => deadline_exceeded(run_id, &case, latency),
        };
        info!(
            test_name = %case.name,
            status = %result.status(),
            latency_ms = latency.as_millis() as u64,
            "Test completed"
        );
        Some(result)
    }
}

fn deadline_exceeded(run_id: &RunId, case: &TestCase, latency: Duration) -> TestResult {
    TestResult::errored(
        run_id.clone(),
        case.name.clone(),
        RUN_DEADLINE_EXCEEDED,
        latency,
        Timestamp::now(),
    )
}

/// Status equal to the expectation is a pass, any other status a fail, and a
/// call that did not complete an error.
fn classify(
    run_id: &RunId,
    case: &TestCase,
    outcome: Result<ProbeResponse, ExecutionError>,
    latency: Duration,
) -> TestResult {
    let run_id = run_id.clone();
    let name = case.name.clone();
    let now = Timestamp::now();
    match outcome {
        Ok(response) if response.status != case.expected_status => TestResult::failed(
            run_id,
            name,
            response.status,
            format!("Expected {}, got {}", case.expected_status, response.status),
            latency,
            now,
        ),
        Ok(response)
            if case.validate_json
                && serde_json::from_slice::<IgnoredAny>(&response.body).is_err() =>
        {
            TestResult::failed(
                run_id,
                name,
                response.status,
                INVALID_JSON_RESPONSE,
                latency,
                now,
            )
        }
        Ok(response) => TestResult::passed(run_id, name, response.status, latency, now),
        Err(error) => TestResult::errored(run_id, name, error.to_string(), latency, now),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use pipeline::{HttpMethod, TestName, TestStatus, Url};

    use super::*;

    enum Script {
        Respond(u16, &'static str),
        Fail(ExecutionError),
        Hang,
        Delay(Duration, u16),
    }

    struct ScriptedProbe(HashMap<String, Script>);

    #[async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn send(&self, request: &ProbeRequest) -> Result<ProbeResponse, ExecutionError> {
            match &self.0[request.url.as_str()] {
                Script::Respond(status, body) => Ok(ProbeResponse {
                    status: *status,
                    body: body.as_bytes().to_vec(),
                }),
                Script::Fail(error) => Err(error.clone()),
                Script::Hang => std::future::pending().await,
                Script::Delay(delay, status) => {
                    tokio::time::sleep(*delay).await;
                    Ok(ProbeResponse {
                        status: *status,
                        body: Vec::new(),
                    })
                }
            }
        }
    }

    fn case(name: &str, expected_status: u16, validate_json: bool) -> TestCase {
        TestCase {
            name: TestName::new(name).unwrap(),
            url: Url::parse(&format!("http://svc/{name}")).unwrap(),
            method: HttpMethod::Get,
            expected_status,
            timeout: Duration::from_secs(5),
            payload: None,
            validate_json,
        }
    }

    fn executor(scripts: Vec<(&str, Script)>, config: ExecutorConfig) -> TestExecutor {
        let probe = ScriptedProbe(
            scripts
                .into_iter()
                .map(|(name, s)| (format!("http://svc/{name}"), s))
                .collect(),
        );
        TestExecutor::new(Arc::new(probe), config)
    }

    fn run_id() -> RunId {
        RunId::new("r1").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn classifies_every_case_in_order() {
        let exec = executor(
            vec![
                ("ok", Script::Respond(200, "")),
                ("wrong", Script::Respond(500, "")),
                ("down", Script::Fail(ExecutionError::Connect {
                    message: "refused".into(),
                })),
                ("slow", Script::Hang),
                ("json", Script::Respond(200, "<html>")),
                ("created", Script::Respond(201, "{\"id\":1}")),
            ],
            ExecutorConfig::default(),
        );
        let cases = vec![
            case("ok", 200, false),
            case("wrong", 200, false),
            case("down", 200, false),
            case("slow", 200, false),
            case("json", 200, true),
            case("created", 201, true),
        ];

        let outcome = exec.run(&run_id(), cases, &CancellationToken::new()).await;

        assert!(!outcome.cancelled);
        let summary: Vec<_> = outcome
            .results
            .iter()
            .map(|r| (r.test_name().as_str(), r.status(), r.error_detail()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("ok", TestStatus::Pass, None),
                ("wrong", TestStatus::Fail, Some("Expected 200, got 500")),
                ("down", TestStatus::Error, Some("Connection failed: refused")),
                ("slow", TestStatus::Error, Some("Request timeout after 5s")),
                ("json", TestStatus::Fail, Some(INVALID_JSON_RESPONSE)),
                ("created", TestStatus::Pass, None),
            ]
        );
        assert_eq!(outcome.results[1].observed_status_code(), Some(500));
        assert_eq!(outcome.results[2].observed_status_code(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_unfinished_cases_into_errors() {
        let exec = executor(
            vec![
                ("fast", Script::Respond(200, "")),
                ("slow", Script::Delay(Duration::from_secs(4), 200)),
            ],
            ExecutorConfig {
                concurrency: 2,
                run_timeout: Duration::from_secs(1),
            },
        );
        let outcome = exec
            .run(
                &run_id(),
                vec![case("fast", 200, false), case("slow", 200, false)],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].status(), TestStatus::Pass);
        assert_eq!(outcome.results[1].status(), TestStatus::Error);
        assert_eq!(
            outcome.results[1].error_detail(),
            Some(RUN_DEADLINE_EXCEEDED)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_drops_unfinished_cases() {
        let exec = executor(
            vec![
                ("fast", Script::Respond(200, "")),
                ("slow", Script::Delay(Duration::from_secs(3), 200)),
                ("later", Script::Respond(200, "")),
            ],
            ExecutorConfig {
                concurrency: 1,
                run_timeout: Duration::from_secs(60),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = exec
            .run(
                &run_id(),
                vec![
                    case("fast", 200, false),
                    case("slow", 200, false),
                    case("later", 200, false),
                ],
                &cancel,
            )
            .await;

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].test_name().as_str(), "fast");
    }
}
