// Raw record models for the parser
//
// Producers push records as JSON: a small envelope (source, event id or
// name, timestamp) around an opaque payload map whose field names follow
// the operational-log convention (`Image`, `TargetObject`, `ProcessId`,
// string-typed numbers and all).

use serde::Deserialize;
use serde_json::{Map, Value};

/// A raw record as delivered by a producer, before decoding
///
/// Unknown envelope fields are ignored; the payload map is carried through
/// verbatim so the decoded event keeps every field the producer sent.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    /// Producer name: "kernel" or "sysmon"
    #[serde(default)]
    pub source: Option<String>,

    /// Numeric event id (operational-log convention)
    #[serde(default, alias = "EventID")]
    pub event_id: Option<i64>,

    /// Symbolic event name (kernel-tracing convention)
    #[serde(default, alias = "opcode")]
    pub event_name: Option<String>,

    /// Record timestamp; the payload's `UtcTime` takes precedence when present
    #[serde(default, alias = "UtcTime")]
    pub utc_time: Option<String>,

    /// The event payload proper
    #[serde(default, alias = "EventData")]
    pub data: Map<String, Value>,
}

impl RawRecord {
    /// Parse a record out of a JSON value; `None` when the envelope is
    /// structurally malformed
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// String payload field, empty treated as missing
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.data
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Integer payload field; the operational log serializes numbers as text
    pub fn field_i64(&self, name: &str) -> Option<i64> {
        match self.data.get(name) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Originating pid, wherever the producer put it
    pub fn pid(&self) -> Option<i64> {
        self.field_i64("ProcessId")
            .or_else(|| self.field_i64("SourceProcessId"))
    }
}
