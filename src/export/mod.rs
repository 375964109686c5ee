//! Exporter adapter - the sink abstraction the recorder emits through
//!
//! The recorder drives span lifecycle and log emission through the
//! [`ExporterAdapter`] trait without knowing wire details. The OTLP
//! implementation lives in [`otlp`]; tests use [`RecordingExporter`], which
//! captures every operation in memory.
//!
//! # Architecture
//!
//! ```text
//! SystemActivityRecorder
//!     │
//!     └──→ ExporterAdapter (trait)
//!             ├──→ OtlpExporter ──→ BoundedQueue ──→ exporter thread ──→ collector
//!             └──→ RecordingExporter (tests)
//! ```

pub mod otlp;
pub mod queue;

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Opaque identifier for an externally tracked span
///
/// Handles are issued by the adapter and are never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanHandle(pub u64);

impl fmt::Display for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span#{}", self.0)
    }
}

/// Span attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::Int(v as i64)
    }
}

/// Severity of an emitted log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    #[allow(dead_code)] // Producers emit nothing below Info today
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
        }
    }
}

/// Sink abstraction for span lifecycle and log emission
///
/// All methods except `flush`/`shutdown` must be non-blocking: the OTLP
/// implementation absorbs back-pressure in a bounded queue and drops the
/// oldest queued operation on overflow. The recorder only ever sees
/// queued-or-dropped, never an error, from emission calls.
pub trait ExporterAdapter: Send + Sync {
    /// Allocate a span. The span is not live until `start_span`.
    fn create_span(&self, name: &str, parent: Option<SpanHandle>) -> SpanHandle;

    /// Begin the span at the given instant
    fn start_span(&self, handle: SpanHandle, at: DateTime<Utc>);

    /// End the span at the given instant; the handle is dead afterwards
    fn stop_span(&self, handle: SpanHandle, at: DateTime<Utc>);

    /// Set an attribute on a live (created or started) span
    fn set_attribute(&self, handle: SpanHandle, key: &str, value: AttrValue);

    /// Emit a log record associated with the span
    fn emit_log(&self, handle: SpanHandle, body: String, severity: LogSeverity);

    /// Drain queued operations, waiting up to `deadline`
    fn flush(&self, deadline: Duration) -> Result<()>;

    /// Flush and release the sink, waiting up to `deadline`
    fn shutdown(&self, deadline: Duration) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording exporter (test double)
// ─────────────────────────────────────────────────────────────────────────────

/// One captured adapter operation
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOp {
    Create {
        handle: SpanHandle,
        name: String,
        parent: Option<SpanHandle>,
    },
    Start {
        handle: SpanHandle,
        at: DateTime<Utc>,
    },
    Stop {
        handle: SpanHandle,
        at: DateTime<Utc>,
    },
    Attr {
        handle: SpanHandle,
        key: String,
        value: AttrValue,
    },
    Log {
        handle: SpanHandle,
        body: String,
        severity: LogSeverity,
    },
    Flush,
    Shutdown,
}

/// In-memory adapter that records every operation, for recorder tests
///
/// Handle allocation matches the real adapter (monotonic, never reused) so
/// tests can assert parentage and lifecycle ordering exactly.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingExporter {
    ops: parking_lot::Mutex<Vec<EmitOp>>,
    next_handle: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<EmitOp> {
        self.ops.lock().clone()
    }

    /// Parent recorded at creation for the given span
    pub fn parent_of(&self, handle: SpanHandle) -> Option<SpanHandle> {
        self.ops.lock().iter().find_map(|op| match op {
            EmitOp::Create {
                handle: h, parent, ..
            } if *h == handle => *parent,
            _ => None,
        })
    }

    pub fn created_count(&self) -> usize {
        self.count(|op| matches!(op, EmitOp::Create { .. }))
    }

    pub fn started_count(&self) -> usize {
        self.count(|op| matches!(op, EmitOp::Start { .. }))
    }

    pub fn stopped_count(&self) -> usize {
        self.count(|op| matches!(op, EmitOp::Stop { .. }))
    }

    pub fn is_stopped(&self, handle: SpanHandle) -> bool {
        self.ops
            .lock()
            .iter()
            .any(|op| matches!(op, EmitOp::Stop { handle: h, .. } if *h == handle))
    }

    /// Every span that was started was also stopped
    pub fn all_spans_stopped(&self) -> bool {
        let ops = self.ops.lock();
        ops.iter().all(|op| match op {
            EmitOp::Start { handle, .. } => ops
                .iter()
                .any(|o| matches!(o, EmitOp::Stop { handle: h, .. } if h == handle)),
            _ => true,
        })
    }

    pub fn logs_for(&self, handle: SpanHandle) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                EmitOp::Log {
                    handle: h, body, ..
                } if *h == handle => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Attribute value as set at stop time (last write wins)
    pub fn attr_of(&self, handle: SpanHandle, key: &str) -> Option<AttrValue> {
        self.ops
            .lock()
            .iter()
            .rev()
            .find_map(|op| match op {
                EmitOp::Attr {
                    handle: h,
                    key: k,
                    value,
                } if *h == handle && k == key => Some(value.clone()),
                _ => None,
            })
    }

    fn count(&self, pred: impl Fn(&EmitOp) -> bool) -> usize {
        self.ops.lock().iter().filter(|op| pred(op)).count()
    }
}

#[cfg(test)]
impl ExporterAdapter for RecordingExporter {
    fn create_span(&self, name: &str, parent: Option<SpanHandle>) -> SpanHandle {
        let handle = SpanHandle(
            self.next_handle
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        );
        self.ops.lock().push(EmitOp::Create {
            handle,
            name: name.to_string(),
            parent,
        });
        handle
    }

    fn start_span(&self, handle: SpanHandle, at: DateTime<Utc>) {
        self.ops.lock().push(EmitOp::Start { handle, at });
    }

    fn stop_span(&self, handle: SpanHandle, at: DateTime<Utc>) {
        self.ops.lock().push(EmitOp::Stop { handle, at });
    }

    fn set_attribute(&self, handle: SpanHandle, key: &str, value: AttrValue) {
        self.ops.lock().push(EmitOp::Attr {
            handle,
            key: key.to_string(),
            value,
        });
    }

    fn emit_log(&self, handle: SpanHandle, body: String, severity: LogSeverity) {
        self.ops.lock().push(EmitOp::Log {
            handle,
            body,
            severity,
        });
    }

    fn flush(&self, _deadline: Duration) -> Result<()> {
        self.ops.lock().push(EmitOp::Flush);
        Ok(())
    }

    fn shutdown(&self, _deadline: Duration) -> Result<()> {
        self.ops.lock().push(EmitOp::Shutdown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_exporter_tracks_parentage() {
        let exp = RecordingExporter::new();
        let root = exp.create_span("proc", None);
        let child = exp.create_span("actor", Some(root));
        assert_eq!(exp.parent_of(child), Some(root));
        assert_eq!(exp.parent_of(root), None);
        assert_ne!(root, child);
    }

    #[test]
    fn recording_exporter_tracks_lifecycle() {
        let exp = RecordingExporter::new();
        let h = exp.create_span("proc", None);
        exp.start_span(h, Utc::now());
        assert!(!exp.is_stopped(h));
        assert!(!exp.all_spans_stopped());
        exp.stop_span(h, Utc::now());
        assert!(exp.is_stopped(h));
        assert!(exp.all_spans_stopped());
    }
}
