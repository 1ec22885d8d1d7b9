//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging — for example —
//! a [`MessageId`] with a [`LockToken`] even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Timestamp;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — run-scoped
// ---------------------------------------------------------------------------

string_id! {
    /// Correlates every result produced by one execution of the test suite.
    ///
    /// Generated ids look like `test-20261018-142501-1a2b3c4d`; externally
    /// supplied ids (e.g. `"r1"`) are accepted verbatim.
    RunId
}

impl RunId {
    /// Generates a fresh run identifier from the given wall-clock time.
    pub fn generate(now: Timestamp) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "test-{}-{}",
            now.as_datetime().format("%Y%m%d-%H%M%S"),
            &suffix[..8]
        ))
    }
}

string_id! {
    /// Name of a test case; unique within one suite.
    TestName
}

// ---------------------------------------------------------------------------
// Identifiers — broker-facing
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a message on the bus.
    ///
    /// Results are published with the producer-assigned id
    /// `"{run_id}:{test_name}"` (see [`MessageId::for_result`]), so re-publishing
    /// the same result yields the same id and the processor's marker absorbs it.
    MessageId
}

impl MessageId {
    /// Builds the stable producer-side id for one result of one run.
    pub fn for_result(run_id: &RunId, test_name: &TestName) -> Self {
        Self(format!("{run_id}:{test_name}"))
    }

    /// Generates a random id for messages published without a producer id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

string_id! {
    /// Opaque token proving exclusive delivery of one message.
    ///
    /// Only valid while the lease it was issued with is live; brokers reject
    /// stale tokens with [`crate::BrokerError::LockLost`].
    LockToken
}

impl LockToken {
    /// Generates a fresh random token.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

string_id! {
    /// A durable publish point supporting fan-out (e.g. `"api-test-results"`).
    TopicName
}

string_id! {
    /// An independent consumer view of a topic with its own cursor and
    /// dead-letter store.
    SubscriptionName
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(RunId::new("").is_none());
        assert!(TestName::new("").is_none());
        assert!(TopicName::new("api-test-results").is_some());
    }

    #[test]
    fn message_id_for_result_joins_run_and_test() {
        let run = RunId::new("r1").unwrap();
        let name = TestName::new("health").unwrap();
        assert_eq!(MessageId::for_result(&run, &name).as_str(), "r1:health");
    }

    #[test]
    fn generated_run_id_has_timestamp_and_suffix() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-10-18T14:25:01Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let id = RunId::generate(Timestamp::from_utc(at));
        assert!(id.as_str().starts_with("test-20261018-142501-"));
        assert_eq!(id.as_str().len(), "test-20261018-142501-".len() + 8);
    }

    #[test]
    fn identifiers_serialize_as_plain_strings() {
        let id = MessageId::new("abc").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
