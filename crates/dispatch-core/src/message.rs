//! Task message shapes exchanged between producers, the pool, and workers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Duplicate-suppression policy carried on a task message.
///
/// See `SPEC_FULL.md` §4.4 for the full decision table. `Parallel` is the
/// default applied both when the field is absent and when an unrecognized
/// string value is encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDuplicate {
    #[default]
    Parallel,
    Serial,
    QueueOne,
    Discard,
}

impl OnDuplicate {
    /// Parses the field leniently: unknown values fall back to `Parallel`
    /// rather than rejecting the message, matching the reference behavior
    /// of logging-and-defaulting instead of failing dispatch.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw {
            "parallel" => Self::Parallel,
            "serial" => Self::Serial,
            "queue_one" => Self::QueueOne,
            "discard" => Self::Discard,
            other => {
                tracing::warn!(value = other, "unrecognized on_duplicate value, treating as parallel");
                Self::Parallel
            }
        }
    }
}

/// Deserializes through [`OnDuplicate::parse_lenient`] rather than serde's
/// generated strict-enum deserializer, so an unrecognized string falls back
/// to `Parallel` instead of rejecting the whole message, per `SPEC_FULL.md`
/// §4.4 ("Unknown value: logged and treated as `parallel`").
impl<'de> Deserialize<'de> for OnDuplicate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(OnDuplicate::parse_lenient(&raw))
    }
}

/// A task message accepted by [`crate::pool::Pool::dispatch`].
///
/// Only `uuid`, `timeout`, `on_duplicate`, and the `(task, args, kwargs)`
/// triple are ever inspected by the pool; everything else is opaque cargo
/// ferried to the worker-side executor untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub uuid: String,
    pub task: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub kwargs: Value,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub on_duplicate: OnDuplicate,
    /// Producer-side delay before submission; the pool never sees a message
    /// until it is ready to run, so this is carried only for round-tripping.
    #[serde(default)]
    pub delay: Option<f64>,
}

impl TaskMessage {
    /// `uuid`, falling back to the reference implementation's placeholder
    /// for log lines where the field was somehow absent.
    pub fn uuid_or_unknown(&self) -> &str {
        if self.uuid.is_empty() { "<unknown>" } else { &self.uuid }
    }

    /// Canonical serialization of the `(task, args, kwargs)` identity used
    /// for duplicate detection. Two messages are duplicates of each other
    /// iff this value is equal.
    pub fn duplicate_key(&self) -> String {
        // serde_json::Value's Map is a BTreeMap, so object keys serialize
        // in sorted order rather than source order. That's still
        // deterministic for a fixed input, which is all that's needed here
        // since both sides of every comparison come from the same
        // producer-authored message shape.
        serde_json::json!([&self.task, &self.args, &self.kwargs]).to_string()
    }
}

/// What the pool writes onto a worker's inbound channel.
#[derive(Debug, Clone)]
pub enum WorkerInbound {
    Task(Box<TaskMessage>),
    Stop,
}

/// What a worker reports back on the shared outbound channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Ready,
    Shutdown,
    Done {
        #[serde(default)]
        result: Option<String>,
    },
}

/// A raw outbound line from a worker subprocess, or the internal sentinel
/// posted during shutdown to unblock the results loop.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Worker { worker_id: u64, event: WorkerEvent },
    Stop,
}

pub const CANCEL_RESULT: &str = "<cancel>";

#[cfg(test)]
mod tests {
    use super::*;

    fn base(uuid: &str) -> TaskMessage {
        TaskMessage {
            uuid: uuid.to_string(),
            task: "sleep".to_string(),
            args: serde_json::json!({"seconds": 1}),
            kwargs: serde_json::json!({}),
            timeout: None,
            on_duplicate: OnDuplicate::Parallel,
            delay: None,
        }
    }

    #[test]
    fn on_duplicate_default_is_parallel() {
        assert_eq!(OnDuplicate::default(), OnDuplicate::Parallel);
    }

    #[test]
    fn parse_lenient_recognizes_every_variant() {
        assert_eq!(OnDuplicate::parse_lenient("parallel"), OnDuplicate::Parallel);
        assert_eq!(OnDuplicate::parse_lenient("serial"), OnDuplicate::Serial);
        assert_eq!(OnDuplicate::parse_lenient("queue_one"), OnDuplicate::QueueOne);
        assert_eq!(OnDuplicate::parse_lenient("discard"), OnDuplicate::Discard);
    }

    #[test]
    fn parse_lenient_falls_back_to_parallel_for_unknown_values() {
        assert_eq!(OnDuplicate::parse_lenient("bogus"), OnDuplicate::Parallel);
        assert_eq!(OnDuplicate::parse_lenient(""), OnDuplicate::Parallel);
    }

    #[test]
    fn uuid_or_unknown_falls_back_when_empty() {
        let mut message = base("");
        assert_eq!(message.uuid_or_unknown(), "<unknown>");
        message.uuid = "real-id".to_string();
        assert_eq!(message.uuid_or_unknown(), "real-id");
    }

    #[test]
    fn duplicate_key_is_structural_not_identity_based() {
        let a = base("a");
        let mut b = base("b");
        // Differing uuid alone must not change the duplicate identity.
        assert_eq!(a.duplicate_key(), b.duplicate_key());

        b.args = serde_json::json!({"seconds": 2});
        assert_ne!(a.duplicate_key(), b.duplicate_key());
    }

    #[test]
    fn on_duplicate_serializes_as_snake_case() {
        let message = base("a");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["on_duplicate"], serde_json::json!("parallel"));
    }

    #[test]
    fn task_message_deserializes_with_defaults_for_optional_fields() {
        let parsed: TaskMessage = serde_json::from_str(r#"{"uuid": "x", "task": "sleep"}"#).unwrap();
        assert_eq!(parsed.timeout, None);
        assert_eq!(parsed.delay, None);
        assert_eq!(parsed.on_duplicate, OnDuplicate::Parallel);
    }

    #[test]
    fn worker_event_deserializes_by_tag() {
        let ready: WorkerEvent = serde_json::from_str(r#"{"event": "ready"}"#).unwrap();
        assert!(matches!(ready, WorkerEvent::Ready));

        let done: WorkerEvent = serde_json::from_str(r#"{"event": "done", "result": "<cancel>"}"#).unwrap();
        match done {
            WorkerEvent::Done { result } => assert_eq!(result.as_deref(), Some(CANCEL_RESULT)),
            _ => panic!("expected Done variant"),
        }
    }
}
