//! Test suite configuration.
//!
//! The suite file is JSON:
//!
//! ```json
//! { "api_tests": [
//!     { "name": "HTTPBin Status Check", "url": "https://httpbin.org/status/200",
//!       "method": "GET", "expected_status": 200, "timeout": 10 }
//! ] }
//! ```
//!
//! `method` defaults to `GET`, `expected_status` to 200 and `timeout` (seconds,
//! fractional allowed) to 30. Optional `payload` is sent as a JSON body and
//! `validate_json` requires a JSON response body.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::{ConfigError, HttpMethod, TestCase, TestName};

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Locations searched, in order, when no explicit suite path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "tests/test_config.json",
    "test_config.json",
    "../tests/test_config.json",
];

/// Search order inside a Kubernetes pod, where the suite is usually mounted
/// from a config map.
pub const KUBERNETES_CONFIG_PATHS: &[&str] = &[
    "/config/test_config.json",
    "/workspace/tests/test_config.json",
    "tests/test_config.json",
    "test_config.json",
];

/// Search order for a run in `environment` (see [`crate::RunContext`]).
pub fn config_paths_for(environment: &str) -> &'static [&'static str] {
    if environment == "kubernetes" {
        KUBERNETES_CONFIG_PATHS
    } else {
        DEFAULT_CONFIG_PATHS
    }
}

/// Raw, unvalidated suite file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteConfig {
    pub api_tests: Vec<TestCaseConfig>,
}

/// One raw entry of `api_tests`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseConfig {
    /// Unique within the suite; becomes part of the message id.
    pub name: String,
    /// Must parse as an absolute `http`/`https` URL.
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_status")]
    pub expected_status: i64,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub validate_json: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> i64 {
    200
}

impl TestSuiteConfig {
    /// Parses suite JSON without validating the entries.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Reads and parses a suite file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), tests = config.api_tests.len(), "Loaded test configuration");
        Ok(config)
    }

    /// Loads the first suite file that exists among `candidates`, falling back
    /// to [`TestSuiteConfig::default_suite`] when none does.
    ///
    /// A file that exists but fails to parse is an error, not a fallback.
    pub fn load_first_available(candidates: &[PathBuf]) -> Result<Self, ConfigError> {
        for path in candidates {
            if path.is_file() {
                return Self::load(path);
            }
        }
        warn!(
            searched = ?candidates,
            "No test configuration file found, using default tests"
        );
        Ok(Self::default_suite())
    }

    /// Two httpbin checks used when no suite file is available.
    pub fn default_suite() -> Self {
        Self {
            api_tests: vec![
                TestCaseConfig {
                    name: "HTTPBin Status Check".into(),
                    url: "https://httpbin.org/status/200".into(),
                    method: "GET".into(),
                    expected_status: 200,
                    timeout: Some(10.0),
                    payload: None,
                    validate_json: false,
                },
                TestCaseConfig {
                    name: "HTTPBin JSON Test".into(),
                    url: "https://httpbin.org/json".into(),
                    method: "GET".into(),
                    expected_status: 200,
                    timeout: Some(10.0),
                    payload: None,
                    validate_json: true,
                },
            ],
        }
    }

    /// Validates every entry and returns the cases in file order.
    pub fn into_cases(self) -> Result<Vec<TestCase>, ConfigError> {
        if self.api_tests.is_empty() {
            return Err(ConfigError::EmptySuite);
        }

        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(self.api_tests.len());
        for raw in self.api_tests {
            let name = TestName::new(raw.name.trim()).ok_or(ConfigError::EmptyName)?;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateName {
                    name: name.to_string(),
                });
            }
            let url = parse_http_url(&raw.url).ok_or_else(|| ConfigError::InvalidUrl {
                name: name.to_string(),
                url: raw.url.clone(),
            })?;
            let method: HttpMethod = raw.method.parse()?;
            let expected_status = u16::try_from(raw.expected_status)
                .ok()
                .filter(|s| (100..=599).contains(s))
                .ok_or_else(|| ConfigError::InvalidStatus {
                    name: name.to_string(),
                    status: raw.expected_status,
                })?;
            let secs = raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
            let timeout = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|t| !t.is_zero())
                .ok_or_else(|| ConfigError::InvalidTimeout {
                    name: name.to_string(),
                })?;

            cases.push(TestCase {
                name,
                url,
                method,
                expected_status,
                timeout,
                payload: raw.payload,
                validate_json: raw.validate_json,
            });
        }
        Ok(cases)
    }
}

/// Parses `raw` as an absolute `http`/`https` URL with a non-empty host.
fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    (matches!(url.scheme(), "http" | "https") && has_host).then_some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite(entries: &str) -> TestSuiteConfig {
        TestSuiteConfig::from_json(&format!(r#"{{"api_tests":[{entries}]}}"#)).unwrap()
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let cases = suite(r#"{"name":"health","url":"http://svc/health"}"#)
            .into_cases()
            .unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].method, HttpMethod::Get);
        assert_eq!(cases[0].expected_status, 200);
        assert_eq!(cases[0].timeout, Duration::from_secs(30));
        assert!(!cases[0].validate_json);
    }

    #[test]
    fn order_is_preserved() {
        let cases = suite(
            r#"{"name":"b","url":"http://x/b"},{"name":"a","url":"http://x/a","method":"post","timeout":0.5}"#,
        )
        .into_cases()
        .unwrap();
        assert_eq!(cases[0].name.as_str(), "b");
        assert_eq!(cases[1].method, HttpMethod::Post);
        assert_eq!(cases[1].timeout, Duration::from_millis(500));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = suite(r#"{"name":"a","url":"http://x"},{"name":"a","url":"http://y"}"#)
            .into_cases()
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateName { name: "a".into() });
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let bad_method = suite(r#"{"name":"a","url":"http://x","method":"FETCH"}"#).into_cases();
        assert!(matches!(bad_method, Err(ConfigError::InvalidMethod { .. })));

        let bad_status =
            suite(r#"{"name":"a","url":"http://x","expected_status":42}"#).into_cases();
        assert!(matches!(bad_status, Err(ConfigError::InvalidStatus { status: 42, .. })));

        let bad_timeout = suite(r#"{"name":"a","url":"http://x","timeout":0}"#).into_cases();
        assert!(matches!(bad_timeout, Err(ConfigError::InvalidTimeout { .. })));

        let negative = suite(r#"{"name":"a","url":"http://x","timeout":-1}"#).into_cases();
        assert!(matches!(negative, Err(ConfigError::InvalidTimeout { .. })));

        let bad_url = suite(r#"{"name":"a","url":"ftp://x"}"#).into_cases();
        assert!(matches!(bad_url, Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn malformed_urls_are_rejected_at_load() {
        for url in [
            "http://host:99999/",
            "http://[::1/",
            "https://exa%mple/",
            "mailto:ops@example.com",
            "/relative/path",
            "http://bad host/",
        ] {
            let entry = format!(r#"{{"name":"a","url":"{url}"}}"#);
            let result = suite(&entry).into_cases();
            assert!(
                matches!(result, Err(ConfigError::InvalidUrl { .. })),
                "{url} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn valid_urls_are_parsed() {
        let cases = suite(
            r#"{"name":"a","url":"https://api.example.com:8443/v1/health?deep=true"},{"name":"b","url":"http://[::1]:8080/"}"#,
        )
        .into_cases()
        .unwrap();
        assert_eq!(cases[0].url.scheme(), "https");
        assert_eq!(cases[0].url.host_str(), Some("api.example.com"));
        assert_eq!(cases[0].url.port(), Some(8443));
        assert_eq!(cases[1].url.port(), Some(8080));
    }

    #[test]
    fn empty_suite_is_rejected() {
        let err = TestSuiteConfig::from_json(r#"{"api_tests":[]}"#)
            .unwrap()
            .into_cases()
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptySuite);
    }

    #[test]
    fn missing_files_fall_back_to_default_suite() {
        let config =
            TestSuiteConfig::load_first_available(&[PathBuf::from("/definitely/not/here.json")])
                .unwrap();
        assert_eq!(config, TestSuiteConfig::default_suite());
        assert_eq!(config.into_cases().unwrap().len(), 2);
    }

    #[test]
    fn kubernetes_searches_mounted_config_first() {
        assert_eq!(config_paths_for("kubernetes")[0], "/config/test_config.json");
        assert_eq!(config_paths_for("github-actions"), DEFAULT_CONFIG_PATHS);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            TestSuiteConfig::from_json("not json"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
