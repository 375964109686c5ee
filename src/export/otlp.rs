//! OTLP export - spans and logs over gRPC to the collector
//!
//! Uses a dedicated thread to keep all network I/O away from producer
//! callbacks. Adapter calls translate to commands on a bounded drop-oldest
//! queue; the exporter thread owns the span handles, the tracer/logger
//! providers and a small tokio runtime for the batch exporters.
//!
//! # Architecture
//!
//! ```text
//! SystemActivityRecorder (sync)
//!     │
//!     └──→ OtlpExporter (ExporterAdapter)
//!             │
//!             └──→ BoundedQueue<Command> (drop-oldest)
//!                     │
//!                     └──→ Dedicated Exporter Thread
//!                             │
//!                             └──→ OTLP/gRPC collector (traces + logs)
//! ```

use super::queue::{BoundedQueue, PushOutcome};
use super::{AttrValue, ExporterAdapter, LogSeverity, SpanHandle};
use crate::error::{AgentError, Result};
use crate::metrics::DropCounters;
use chrono::{DateTime, Utc};
use opentelemetry::logs::{LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry::trace::{Span as _, SpanKind, TraceContextExt as _, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

/// Commands sent to the exporter thread
enum Command {
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
    Flush {
        done: mpsc::Sender<()>,
    },
    Shutdown,
}

/// Exporter connection settings
#[derive(Debug, Clone)]
pub struct OtlpSettings {
    /// Collector endpoint, e.g. `http://collector:4317`
    pub endpoint: String,
    /// Resource attribute `service.name` and tracer/logger name
    pub service_name: String,
    /// Command queue capacity before drop-oldest kicks in
    pub queue_capacity: usize,
}

/// One-shot completion latch for graceful shutdown
struct CompletionSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn complete(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if *done {
            return true;
        }
        self.cond.wait_for(&mut done, timeout);
        *done
    }
}

/// OTLP-backed [`ExporterAdapter`]
pub struct OtlpExporter {
    queue: Arc<BoundedQueue<Command>>,
    next_handle: AtomicU64,
    counters: Arc<DropCounters>,
    completion: Arc<CompletionSignal>,
    last_drop_warn: Mutex<Option<Instant>>,
    _exporter_handle: Option<JoinHandle<()>>,
}

/// Minimum gap between queue-overflow warnings
const DROP_WARN_INTERVAL: Duration = Duration::from_secs(10);

impl OtlpExporter {
    /// Spawn the exporter thread and return the adapter front
    pub fn new(settings: OtlpSettings, counters: Arc<DropCounters>) -> Result<Self> {
        let queue = Arc::new(BoundedQueue::new(settings.queue_capacity));
        let completion = Arc::new(CompletionSignal::new());

        let thread_queue = queue.clone();
        let thread_completion = completion.clone();
        let exporter_handle = thread::Builder::new()
            .name("otlp-exporter".into())
            .spawn(move || {
                if let Err(e) = Self::exporter_thread(thread_queue, &settings) {
                    tracing::error!("OTLP exporter thread error: {e}");
                }
                thread_completion.complete();
            })
            .map_err(|e| AgentError::Exporter(format!("failed to spawn exporter thread: {e}")))?;

        tracing::info!("OTLP exporter initialized");

        Ok(Self {
            queue,
            next_handle: AtomicU64::new(1),
            counters,
            completion,
            last_drop_warn: Mutex::new(None),
            _exporter_handle: Some(exporter_handle),
        })
    }

    /// Dedicated exporter thread - owns span state and the OTel providers
    fn exporter_thread(queue: Arc<BoundedQueue<Command>>, settings: &OtlpSettings) -> Result<()> {
        // The batch exporters spawn background tasks that need a runtime;
        // a single worker is enough for telemetry.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| AgentError::Exporter(format!("failed to create tokio runtime: {e}")))?;

        // The runtime context must be entered BEFORE constructing the batch
        // exporters: they spawn tasks during construction.
        let _guard = rt.enter();

        let resource = Resource::new([KeyValue::new(
            "service.name",
            settings.service_name.clone(),
        )]);

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(settings.endpoint.clone())
            .build()
            .map_err(|e| AgentError::Exporter(format!("failed to create span exporter: {e}")))?;

        let tracer_provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_batch_exporter(span_exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(resource.clone())
            .build();
        let tracer = tracer_provider.tracer(settings.service_name.clone());

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(settings.endpoint.clone())
            .build()
            .map_err(|e| AgentError::Exporter(format!("failed to create log exporter: {e}")))?;

        let logger_provider = opentelemetry_sdk::logs::LoggerProvider::builder()
            .with_batch_exporter(log_exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(resource)
            .build();
        let logger = logger_provider.logger(settings.service_name.clone());

        tracing::debug!("OTLP exporter thread started");

        // Live span state, keyed by handle. Pending spans are created but
        // not yet started; active spans own a real SDK span.
        enum Slot {
            Pending {
                name: String,
                parent: Option<SpanHandle>,
                attrs: Vec<KeyValue>,
            },
            Active(opentelemetry_sdk::trace::Span),
        }
        let mut slots: HashMap<SpanHandle, Slot> = HashMap::new();

        loop {
            let command = match queue.pop_wait(Duration::from_secs(1)) {
                Some(c) => c,
                None if queue.is_closed() => break,
                None => continue,
            };

            match command {
                Command::Create {
                    handle,
                    name,
                    parent,
                } => {
                    slots.insert(
                        handle,
                        Slot::Pending {
                            name,
                            parent,
                            attrs: Vec::new(),
                        },
                    );
                }
                Command::Start { handle, at } => {
                    // Only a pending span can start; a stray double-start
                    // must not tear down a live one.
                    if !matches!(slots.get(&handle), Some(Slot::Pending { .. })) {
                        continue;
                    }
                    let Some(Slot::Pending {
                        name,
                        parent,
                        attrs,
                    }) = slots.remove(&handle)
                    else {
                        continue;
                    };
                    // Parent resolution is best-effort: if the parent span
                    // is not live, the child becomes a root.
                    let parent_cx = parent
                        .and_then(|p| match slots.get(&p) {
                            Some(Slot::Active(span)) => Some(span.span_context().clone()),
                            _ => None,
                        })
                        .map(|sc| Context::new().with_remote_span_context(sc))
                        .unwrap_or_else(Context::new);

                    let builder = tracer
                        .span_builder(name)
                        .with_kind(SpanKind::Internal)
                        .with_start_time(SystemTime::from(at))
                        .with_attributes(attrs);
                    let span = tracer.build_with_context(builder, &parent_cx);
                    slots.insert(handle, Slot::Active(span));
                }
                Command::Stop { handle, at } => {
                    match slots.remove(&handle) {
                        Some(Slot::Active(mut span)) => {
                            span.end_with_timestamp(SystemTime::from(at));
                        }
                        // Never started: nothing to export
                        Some(Slot::Pending { .. }) | None => {}
                    }
                }
                Command::Attr { handle, key, value } => {
                    let kv = KeyValue::new(key, otel_value(value));
                    match slots.get_mut(&handle) {
                        Some(Slot::Active(span)) => span.set_attribute(kv),
                        Some(Slot::Pending { attrs, .. }) => attrs.push(kv),
                        None => {}
                    }
                }
                Command::Log {
                    handle,
                    body,
                    severity,
                } => {
                    let mut record = logger.create_log_record();
                    record.set_timestamp(SystemTime::now());
                    record.set_observed_timestamp(SystemTime::now());
                    record.set_severity_number(otel_severity(severity));
                    record.set_severity_text(severity.as_str());
                    record.set_body(body.into());
                    if let Some(Slot::Active(span)) = slots.get(&handle) {
                        let ctx = span.span_context();
                        record.set_trace_context(
                            ctx.trace_id(),
                            ctx.span_id(),
                            Some(ctx.trace_flags()),
                        );
                    }
                    logger.emit(record);
                }
                Command::Flush { done } => {
                    for result in tracer_provider.force_flush() {
                        if let Err(e) = result {
                            tracing::warn!("trace flush error: {e}");
                        }
                    }
                    for result in logger_provider.force_flush() {
                        if let Err(e) = result {
                            tracing::warn!("log flush error: {e}");
                        }
                    }
                    let _ = done.send(());
                }
                Command::Shutdown => {
                    tracing::debug!("OTLP exporter received shutdown signal");
                    break;
                }
            }
        }

        // End whatever is still live so the batch exporters ship it.
        for (_, slot) in slots.drain() {
            if let Slot::Active(mut span) = slot {
                span.end();
            }
        }

        tracing::debug!("Flushing OTLP spans and logs...");
        if let Err(e) = tracer_provider.shutdown() {
            tracing::error!("tracer provider shutdown error: {e:?}");
        }
        if let Err(e) = logger_provider.shutdown() {
            tracing::error!("logger provider shutdown error: {e:?}");
        }

        tracing::debug!("OTLP exporter thread stopped");
        Ok(())
    }

    /// Enqueue a command, accounting for drop-oldest overflow
    fn push(&self, command: Command) {
        match self.queue.push(command) {
            PushOutcome::Accepted => {}
            PushOutcome::DroppedOldest => {
                self.counters.inc_exporter_queue();
                let mut last = self.last_drop_warn.lock();
                let now = Instant::now();
                if last.map_or(true, |t| now.duration_since(t) >= DROP_WARN_INTERVAL) {
                    *last = Some(now);
                    tracing::warn!(
                        dropped_total = self.counters.snapshot().exporter_queue_drops,
                        "exporter queue full, dropping oldest operations"
                    );
                }
            }
            PushOutcome::Closed => {
                tracing::trace!("exporter queue closed, operation discarded");
            }
        }
    }
}

impl ExporterAdapter for OtlpExporter {
    fn create_span(&self, name: &str, parent: Option<SpanHandle>) -> SpanHandle {
        let handle = SpanHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.push(Command::Create {
            handle,
            name: name.to_string(),
            parent,
        });
        handle
    }

    fn start_span(&self, handle: SpanHandle, at: DateTime<Utc>) {
        self.push(Command::Start { handle, at });
    }

    fn stop_span(&self, handle: SpanHandle, at: DateTime<Utc>) {
        self.push(Command::Stop { handle, at });
    }

    fn set_attribute(&self, handle: SpanHandle, key: &str, value: AttrValue) {
        self.push(Command::Attr {
            handle,
            key: key.to_string(),
            value,
        });
    }

    fn emit_log(&self, handle: SpanHandle, body: String, severity: LogSeverity) {
        self.push(Command::Log {
            handle,
            body,
            severity,
        });
    }

    fn flush(&self, deadline: Duration) -> Result<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.push(Command::Flush { done: done_tx });
        done_rx
            .recv_timeout(deadline)
            .map_err(|_| AgentError::Exporter("flush deadline expired".into()))
    }

    fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.push(Command::Shutdown);
        self.queue.close();
        if !self.completion.wait(deadline) {
            tracing::warn!("OTLP exporter shutdown timed out after {deadline:?}");
            return Err(AgentError::Exporter("shutdown deadline expired".into()));
        }
        Ok(())
    }
}

fn otel_value(value: AttrValue) -> opentelemetry::Value {
    match value {
        AttrValue::Str(s) => opentelemetry::Value::String(s.into()),
        AttrValue::Int(i) => opentelemetry::Value::I64(i),
    }
}

fn otel_severity(severity: LogSeverity) -> Severity {
    match severity {
        LogSeverity::Debug => Severity::Debug,
        LogSeverity::Info => Severity::Info,
        LogSeverity::Warn => Severity::Warn,
        LogSeverity::Error => Severity::Error,
    }
}
