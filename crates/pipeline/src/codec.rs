//! Wire format of a published [`TestResult`].
//!
//! UTF-8 JSON object, fields always in this order:
//!
//! | Field | Type | Presence |
//! |-------|------|----------|
//! | `test_name` | string | always |
//! | `status` | `"pass"` \| `"fail"` \| `"error"` | always |
//! | `observed_status_code` | integer | `pass`, `fail` |
//! | `latency_ms` | integer | always |
//! | `error_detail` | string | `fail`, `error` |
//! | `timestamp` | ISO-8601 UTC string | always |
//! | `run_id` | string | always |
//!
//! Decoding enforces the presence rules; a payload that violates them is as
//! malformed as one that is truncated.

use crate::{MalformedPayloadError, PublishError, TestResult};

/// Content type attached to published payloads.
pub const CONTENT_TYPE: &str = "application/json";

/// Serialises a result into its canonical wire form.
pub fn encode_result(result: &TestResult) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(result).map_err(|e| PublishError::Serialization {
        message: e.to_string(),
    })
}

/// Parses and validates a delivered payload.
pub fn decode_result(payload: &[u8]) -> Result<TestResult, MalformedPayloadError> {
    serde_json::from_slice(payload).map_err(|e| MalformedPayloadError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{RunId, TestName, TestStatus, Timestamp};

    fn at() -> Timestamp {
        Timestamp::from_utc(
            chrono::DateTime::parse_from_rfc3339("2026-10-18T08:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        )
    }

    fn run() -> RunId {
        RunId::new("r1").unwrap()
    }

    #[test]
    fn pass_result_has_stable_field_order_and_omits_error_detail() {
        let result = TestResult::passed(
            run(),
            TestName::new("health").unwrap(),
            200,
            Duration::from_millis(42),
            at(),
        );
        let text = String::from_utf8(encode_result(&result).unwrap()).unwrap();
        assert_eq!(
            text,
            r#"{"test_name":"health","status":"pass","observed_status_code":200,"latency_ms":42,"timestamp":"2026-10-18T08:00:00Z","run_id":"r1"}"#
        );
    }

    #[test]
    fn error_result_omits_status_code() {
        let result = TestResult::errored(
            run(),
            TestName::new("dns").unwrap(),
            "Connection failed: no such host",
            Duration::from_millis(3),
            at(),
        );
        let value: serde_json::Value =
            serde_json::from_slice(&encode_result(&result).unwrap()).unwrap();
        assert!(value.get("observed_status_code").is_none());
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_detail"], "Connection failed: no such host");
    }

    #[test]
    fn decode_accepts_encoded_fail_result() {
        let result = TestResult::failed(
            run(),
            TestName::new("orders").unwrap(),
            500,
            "Expected 200, got 500",
            Duration::from_millis(10),
            at(),
        );
        let decoded = decode_result(&encode_result(&result).unwrap()).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.status(), TestStatus::Fail);
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let err = decode_result(br#"{"test_name":"health","sta"#).unwrap_err();
        assert!(err.message.contains("EOF"));
    }

    #[test]
    fn inconsistent_presence_is_malformed() {
        let payload = br#"{"test_name":"x","status":"pass","latency_ms":1,"timestamp":"2026-10-18T08:00:00Z","run_id":"r1"}"#;
        assert!(decode_result(payload).is_err());
    }

    #[test]
    fn empty_run_id_is_malformed() {
        let payload = br#"{"test_name":"x","status":"error","latency_ms":1,"error_detail":"boom","timestamp":"2026-10-18T08:00:00Z","run_id":""}"#;
        assert!(decode_result(payload).is_err());
    }
}
