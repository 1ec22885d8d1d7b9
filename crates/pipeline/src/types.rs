//! Shared value types for the result delivery domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a `pass` result always has an observed
//! status code, timeouts are strictly positive) and participate in domain
//! computations.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfigError, MessageId, RunId, TestName};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API. Serialises as RFC 3339 / ISO-8601 with a `Z` offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Test cases
// ---------------------------------------------------------------------------

/// HTTP method a test case issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ConfigError;

    /// Parses a method name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(ConfigError::InvalidMethod {
                method: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured API check.
///
/// Built only through [`crate::TestSuiteConfig::into_cases`], which enforces
/// unique names, a valid URL and method, an HTTP status in `100..=599` and a
/// strictly positive timeout. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Unique name within the suite.
    pub name: TestName,
    /// Absolute `http://` or `https://` URL with a host.
    pub url: Url,
    pub method: HttpMethod,
    /// Status code that classifies the response as `pass`.
    pub expected_status: u16,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Optional JSON request body.
    pub payload: Option<serde_json::Value>,
    /// When set, a response body that is not valid JSON fails the check.
    pub validate_json: bool,
}

// ---------------------------------------------------------------------------
// Test results
// ---------------------------------------------------------------------------

/// Outcome classification of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The response status equalled the expected status.
    Pass,
    /// The server responded, but not as expected.
    Fail,
    /// The call did not complete (connect failure, timeout, DNS failure).
    Error,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Error => "error",
        })
    }
}

/// The outcome of running one [`TestCase`], exactly as published on the bus.
///
/// Fields are private: a result is created once by the executor and never
/// mutated. The serialised field order is the wire format documented in
/// [`crate::codec`]. `observed_status_code` is present for `pass` and `fail`;
/// `error_detail` is present for `fail` and `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireTestResult")]
pub struct TestResult {
    test_name: TestName,
    status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed_status_code: Option<u16>,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    timestamp: Timestamp,
    run_id: RunId,
}

impl TestResult {
    /// A result whose response status matched the expectation.
    pub fn passed(
        run_id: RunId,
        test_name: TestName,
        observed_status_code: u16,
        latency: Duration,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            test_name,
            status: TestStatus::Pass,
            observed_status_code: Some(observed_status_code),
            latency_ms: duration_ms(latency),
            error_detail: None,
            timestamp,
            run_id,
        }
    }

    /// A result where the server responded but not as expected.
    pub fn failed(
        run_id: RunId,
        test_name: TestName,
        observed_status_code: u16,
        detail: impl Into<String>,
        latency: Duration,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            test_name,
            status: TestStatus::Fail,
            observed_status_code: Some(observed_status_code),
            latency_ms: duration_ms(latency),
            error_detail: Some(detail.into()),
            timestamp,
            run_id,
        }
    }

    /// A result for a call that did not complete.
    pub fn errored(
        run_id: RunId,
        test_name: TestName,
        detail: impl Into<String>,
        latency: Duration,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            test_name,
            status: TestStatus::Error,
            observed_status_code: None,
            latency_ms: duration_ms(latency),
            error_detail: Some(detail.into()),
            timestamp,
            run_id,
        }
    }

    pub fn test_name(&self) -> &TestName {
        &self.test_name
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn observed_status_code(&self) -> Option<u16> {
        self.observed_status_code
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Returns `true` for [`TestStatus::Pass`].
    pub fn is_pass(&self) -> bool {
        self.status == TestStatus::Pass
    }

    /// The stable producer-assigned message id for this result.
    pub fn message_id(&self) -> MessageId {
        MessageId::for_result(&self.run_id, &self.test_name)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Unvalidated shape of a result as it appears on the wire.
#[derive(Deserialize)]
struct WireTestResult {
    test_name: String,
    status: TestStatus,
    #[serde(default)]
    observed_status_code: Option<u16>,
    latency_ms: u64,
    #[serde(default)]
    error_detail: Option<String>,
    timestamp: Timestamp,
    run_id: String,
}

impl TryFrom<WireTestResult> for TestResult {
    type Error = String;

    fn try_from(wire: WireTestResult) -> Result<Self, Self::Error> {
        let test_name = TestName::new(wire.test_name).ok_or("test_name must not be empty")?;
        let run_id = RunId::new(wire.run_id).ok_or("run_id must not be empty")?;

        match (wire.status, wire.observed_status_code, &wire.error_detail) {
            (TestStatus::Pass, Some(_), None) => {}
            (TestStatus::Fail, Some(_), Some(_)) => {}
            (TestStatus::Error, None, Some(_)) => {}
            (status, code, detail) => {
                return Err(format!(
                    "inconsistent fields for status '{status}': observed_status_code present={}, error_detail present={}",
                    code.is_some(),
                    detail.is_some()
                ));
            }
        }

        Ok(Self {
            test_name,
            status: wire.status,
            observed_status_code: wire.observed_status_code,
            latency_ms: wire.latency_ms,
            error_detail: wire.error_detail,
            timestamp: wire.timestamp,
            run_id,
        })
    }
}
