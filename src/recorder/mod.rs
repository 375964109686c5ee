//! System activity recorder - the orchestrator
//!
//! Producers push decoded events here; the recorder maintains the process
//! forest, resolves parent contexts, upserts actor sub-spans and drives
//! span lifecycle (`Absent → Started → Stopped`) through the exporter
//! adapter. All operations are thread-safe; callers need no external
//! locking.
//!
//! Contract violations (negative pid, empty target, `Unknown` code) come
//! back as `InvalidArgument`. Everything else that goes wrong at runtime is
//! absorbed: untracked pids and producer races are counted and dropped,
//! exporter trouble stays inside the adapter.

pub mod context;
pub mod forest;

use crate::error::{AgentError, Result};
use crate::events::{ActorKind, Artifact, SysEvent, SysEventCode};
use crate::export::ExporterAdapter;
use crate::metrics::DropCounters;
use chrono::Utc;
use forest::ProcessForest;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SystemActivityRecorder {
    forest: ProcessForest,
    exporter: Arc<dyn ExporterAdapter>,
    counters: Arc<DropCounters>,
    /// Set by the first `flush`; mutating calls are dropped afterwards
    terminal: AtomicBool,
}

impl SystemActivityRecorder {
    pub fn new(exporter: Arc<dyn ExporterAdapter>, counters: Arc<DropCounters>) -> Self {
        Self {
            forest: ProcessForest::new(exporter.clone()),
            exporter,
            counters,
            terminal: AtomicBool::new(false),
        }
    }

    /// Track a process launch
    ///
    /// Upserts the pid's node (idempotent: a second call for a live pid
    /// reuses the node and never emits a second span-start) and attaches
    /// `ev` as a log on the process span.
    pub fn start_process(&self, pid: i64, ppid: i64, image: &str, ev: &SysEvent) -> Result<()> {
        if pid < 0 || ppid < 0 {
            return Err(AgentError::invalid_argument(format!(
                "negative pid in start_process: pid={pid} ppid={ppid}"
            )));
        }
        if image.is_empty() {
            return Err(AgentError::invalid_argument("empty image in start_process"));
        }
        if self.is_terminal() {
            self.counters.inc_lifecycle();
            return Ok(());
        }

        let (node, created) = self.forest.get_or_create(pid, ppid, image, ev);
        if created {
            tracing::debug!(pid, ppid, image, "process tracked");
        }
        if !node.attach_process_event(ev, self.exporter.as_ref()) {
            self.counters.inc_lifecycle();
        }
        Ok(())
    }

    /// Stop tracking a process
    ///
    /// Attaches `ev` to the process span, stops all actor spans, stops the
    /// process span and removes the node. A pid never started is a no-op.
    pub fn stop_process(&self, pid: i64, ev: &SysEvent) -> Result<()> {
        if pid < 0 {
            return Err(AgentError::invalid_argument(format!(
                "negative pid in stop_process: {pid}"
            )));
        }
        if self.is_terminal() {
            self.counters.inc_lifecycle();
            return Ok(());
        }

        // Remove before stopping so nobody can look up a node whose span is
        // already stopped.
        let Some(node) = self.forest.remove(pid) else {
            return Ok(());
        };
        if !node.attach_process_event(ev, self.exporter.as_ref()) {
            self.counters.inc_lifecycle();
        }
        node.flush(ev.timestamp, self.exporter.as_ref());
        tracing::debug!(pid, "process stopped");
        Ok(())
    }

    /// Attach an actor event to the originating pid
    ///
    /// Untracked pids are dropped (counted, not an error). `NotActor` codes
    /// attach to the process span itself and never create a sub-span.
    pub fn record_action(
        &self,
        pid: i64,
        target: &str,
        code: SysEventCode,
        ev: &SysEvent,
    ) -> Result<()> {
        if pid < 0 {
            return Err(AgentError::invalid_argument(format!(
                "negative pid in record_action: {pid}"
            )));
        }
        if code == SysEventCode::Unknown {
            return Err(AgentError::invalid_argument("Unknown code in record_action"));
        }
        if self.is_terminal() {
            self.counters.inc_lifecycle();
            return Ok(());
        }

        let Some(node) = self.forest.lookup(pid) else {
            self.counters.inc_not_tracked();
            return Ok(());
        };

        let kind = code.actor_kind();
        if kind == ActorKind::NotActor {
            if !node.attach_process_event(ev, self.exporter.as_ref()) {
                self.counters.inc_lifecycle();
            }
            return Ok(());
        }

        if target.is_empty() {
            return Err(AgentError::invalid_argument(format!(
                "empty target in record_action for {code}"
            )));
        }
        let artifact_kind = code.artifact_kind().ok_or_else(|| {
            AgentError::invalid_argument(format!("unsupported code in record_action: {code}"))
        })?;
        let artifact = Artifact::new(artifact_kind, target)
            .ok_or_else(|| AgentError::invalid_argument("empty artifact name"))?;

        if !node.attach_actor_event(artifact, kind, ev, self.exporter.as_ref()) {
            self.counters.inc_lifecycle();
        }
        Ok(())
    }

    /// Attach a cross-process event (`ProcessAccess`/`CreateRemoteThread`)
    ///
    /// The target artifact is named after the tracked target pid's process
    /// image when known, else `fallback_target`.
    pub fn record_process_access(
        &self,
        src_pid: i64,
        tgt_pid: i64,
        fallback_target: &str,
        code: SysEventCode,
        ev: &SysEvent,
    ) -> Result<()> {
        if !matches!(
            code,
            SysEventCode::ProcessAccess | SysEventCode::CreateRemoteThread
        ) {
            return Err(AgentError::invalid_argument(format!(
                "record_process_access does not accept {code}"
            )));
        }

        let target = self
            .forest
            .lookup(tgt_pid)
            .map(|n| n.ctx.artifact.name.clone())
            .unwrap_or_else(|| fallback_target.to_string());
        self.record_action(src_pid, &target, code, ev)
    }

    /// Read-only forest lookup
    pub fn is_tracked(&self, pid: i64) -> bool {
        self.forest.contains(pid)
    }

    /// Number of live process nodes
    pub fn tracked_count(&self) -> usize {
        self.forest.len()
    }

    /// Stop every span (actors before processes) and drain the exporter
    ///
    /// Idempotent; the recorder is terminal afterwards. The deadline bounds
    /// the exporter drain only - span stops themselves never block.
    pub fn flush(&self, deadline: Duration) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        let started = Instant::now();
        let tracked = self.forest.len();
        self.forest.flush_all(Utc::now());
        tracing::info!(tracked, "recorder flushed");

        let remaining = deadline.saturating_sub(started.elapsed());
        if let Err(e) = self.exporter.flush(remaining) {
            tracing::warn!("exporter drain incomplete: {e}");
        }
    }

    /// Compose `flush` with a final exporter shutdown
    pub fn shutdown(&self, flush_deadline: Duration, shutdown_deadline: Duration) -> Result<()> {
        self.flush(flush_deadline);
        self.exporter.shutdown(shutdown_deadline)
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Direction, EventSource};
    use crate::export::{AttrValue, EmitOp, RecordingExporter, SpanHandle};
    use serde_json::json;

    fn event(code: SysEventCode) -> SysEvent {
        let metadata = match json!({"UtcTime": "2024-01-15 09:30:00.000"}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        SysEvent {
            code,
            timestamp: Utc::now(),
            source: EventSource::Sysmon,
            metadata,
        }
    }

    fn recorder() -> (Arc<RecordingExporter>, SystemActivityRecorder) {
        let exporter = Arc::new(RecordingExporter::new());
        let recorder =
            SystemActivityRecorder::new(exporter.clone(), Arc::new(DropCounters::new()));
        (exporter, recorder)
    }

    fn span_of(exporter: &RecordingExporter, name_part: &str) -> SpanHandle {
        exporter
            .ops()
            .iter()
            .find_map(|op| match op {
                EmitOp::Create { handle, name, .. } if name.contains(name_part) => Some(*handle),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no span named like {name_part}"))
    }

    #[test]
    fn linear_parent_child() {
        let (exporter, rec) = recorder();
        rec.start_process(100, 0, "a.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.start_process(200, 100, "b.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.stop_process(200, &event(SysEventCode::ProcessTerminated))
            .unwrap();
        rec.stop_process(100, &event(SysEventCode::ProcessTerminated))
            .unwrap();

        let parent = span_of(&exporter, "a.exe");
        let child = span_of(&exporter, "b.exe");
        assert_eq!(exporter.parent_of(child), Some(parent));
        assert!(exporter.all_spans_stopped());
        // Both saw a start and a stop event
        for span in [parent, child] {
            match exporter.attr_of(span, "log.count") {
                Some(AttrValue::Int(n)) => assert!(n >= 1),
                other => panic!("missing log.count: {other:?}"),
            }
        }
        assert!(!rec.is_tracked(100));
        assert!(!rec.is_tracked(200));
    }

    #[test]
    fn orphan_child_becomes_root() {
        let (exporter, rec) = recorder();
        rec.start_process(300, 999, "c.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        let span = span_of(&exporter, "c.exe");
        assert_eq!(exporter.parent_of(span), None);
        assert!(rec.is_tracked(300));
        assert!(!rec.is_tracked(999));
    }

    #[test]
    fn actor_dedup_three_creates_one_modify() {
        let (exporter, rec) = recorder();
        rec.start_process(400, 0, "d.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        for _ in 0..3 {
            rec.record_action(400, "C:/x.txt", SysEventCode::FileCreate, &event(SysEventCode::FileCreate))
                .unwrap();
        }
        rec.record_action(400, "C:/x.txt", SysEventCode::FileModified, &event(SysEventCode::FileModified))
            .unwrap();

        let node = rec.forest.lookup(400).unwrap();
        assert_eq!(node.actor_counts(), (0, 2));
        assert_eq!(node.actor_log_count("C:/x.txt@File", ActorKind::Create), Some(3));
        assert_eq!(node.actor_log_count("C:/x.txt@File", ActorKind::Modify), Some(1));
        // One process span + two actor spans, no per-event span explosion
        assert_eq!(exporter.created_count(), 3);
    }

    #[test]
    fn directional_split_same_artifact_name() {
        let (exporter, rec) = recorder();
        rec.start_process(500, 0, "e.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.record_action(500, "mod.dll", SysEventCode::ImageLoad, &event(SysEventCode::ImageLoad))
            .unwrap();
        rec.record_action(500, "mod.dll", SysEventCode::FileModified, &event(SysEventCode::FileModified))
            .unwrap();

        let node = rec.forest.lookup(500).unwrap();
        assert_eq!(node.actor_counts(), (1, 1));

        let load = span_of(&exporter, "mod.dll@Module@LOAD");
        let modify = span_of(&exporter, "mod.dll@File@MODIFY");
        assert_eq!(
            exporter.attr_of(load, "act.type"),
            Some(AttrValue::Str(Direction::ReadRecv.as_str().into()))
        );
        assert_eq!(
            exporter.attr_of(modify, "act.type"),
            Some(AttrValue::Str(Direction::WriteSend.as_str().into()))
        );
    }

    #[test]
    fn double_start_is_idempotent() {
        let (exporter, rec) = recorder();
        let ev = event(SysEventCode::ProcessCreation);
        rec.start_process(600, 0, "f.exe", &ev).unwrap();
        rec.start_process(600, 0, "f.exe", &ev).unwrap();

        assert_eq!(exporter.created_count(), 1);
        assert_eq!(exporter.started_count(), 1);
        let span = span_of(&exporter, "f.exe");
        assert_eq!(exporter.logs_for(span).len(), 2);
        let node = rec.forest.lookup(600).unwrap();
        assert_eq!(node.log_count(), 2);
    }

    #[test]
    fn restart_after_stop_gets_a_fresh_span() {
        let (exporter, rec) = recorder();
        rec.start_process(610, 0, "g.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        let first = span_of(&exporter, "g.exe");
        rec.stop_process(610, &event(SysEventCode::ProcessTerminated))
            .unwrap();
        rec.start_process(610, 0, "g.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();

        assert_eq!(exporter.created_count(), 2);
        assert!(exporter.is_stopped(first));
        assert!(rec.is_tracked(610));
    }

    #[test]
    fn record_action_on_untracked_pid_is_a_noop() {
        let (exporter, rec) = recorder();
        rec.record_action(42, "C:/x.txt", SysEventCode::FileCreate, &event(SysEventCode::FileCreate))
            .unwrap();
        assert!(exporter.ops().is_empty());
        assert_eq!(rec.counters.snapshot().events_dropped_not_tracked, 1);
    }

    #[test]
    fn not_actor_codes_never_create_actor_nodes() {
        let (exporter, rec) = recorder();
        rec.start_process(700, 0, "h.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.record_action(700, "h.exe", SysEventCode::ThreadStart, &event(SysEventCode::ThreadStart))
            .unwrap();

        let node = rec.forest.lookup(700).unwrap();
        assert_eq!(node.actor_counts(), (0, 0));
        // The thread-start log landed on the process span
        assert_eq!(node.log_count(), 2);
        assert_eq!(exporter.created_count(), 1);
    }

    #[test]
    fn stop_of_unknown_pid_is_a_noop() {
        let (exporter, rec) = recorder();
        rec.stop_process(4242, &event(SysEventCode::ProcessTerminated))
            .unwrap();
        assert!(exporter.ops().is_empty());
    }

    #[test]
    fn process_access_resolves_tracked_target_image() {
        let (exporter, rec) = recorder();
        rec.start_process(800, 0, "attacker.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.start_process(900, 0, "victim.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.record_process_access(
            800,
            900,
            "C:/fallback.exe",
            SysEventCode::ProcessAccess,
            &event(SysEventCode::ProcessAccess),
        )
        .unwrap();

        // Actor named after the tracked victim image, not the fallback
        let span = span_of(&exporter, "victim.exe@Process@REMOTE_THREAD");
        assert_eq!(exporter.logs_for(span).len(), 1);
    }

    #[test]
    fn process_access_falls_back_when_target_untracked() {
        let (exporter, rec) = recorder();
        rec.start_process(800, 0, "attacker.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.record_process_access(
            800,
            901,
            "C:/fallback.exe",
            SysEventCode::CreateRemoteThread,
            &event(SysEventCode::CreateRemoteThread),
        )
        .unwrap();
        span_of(&exporter, "C:/fallback.exe@Process@REMOTE_THREAD");
    }

    #[test]
    fn process_access_rejects_other_codes() {
        let (_, rec) = recorder();
        let err = rec
            .record_process_access(1, 2, "x", SysEventCode::FileCreate, &event(SysEventCode::FileCreate))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArgument(_)));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let (_, rec) = recorder();
        let ev = event(SysEventCode::ProcessCreation);
        assert!(matches!(
            rec.start_process(-1, 0, "a.exe", &ev),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.start_process(1, -2, "a.exe", &ev),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.start_process(1, 0, "", &ev),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.stop_process(-1, &ev),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.record_action(-1, "t", SysEventCode::FileCreate, &ev),
            Err(AgentError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.record_action(1, "t", SysEventCode::Unknown, &ev),
            Err(AgentError::InvalidArgument(_))
        ));

        // Empty target only matters for actor codes; the pid must be
        // tracked for the check to be reached
        rec.start_process(1, 0, "a.exe", &ev).unwrap();
        assert!(matches!(
            rec.record_action(1, "", SysEventCode::FileCreate, &ev),
            Err(AgentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn flush_stops_everything_and_is_idempotent() {
        let (exporter, rec) = recorder();
        rec.start_process(1, 0, "a.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.start_process(2, 1, "b.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        rec.record_action(2, "C:/f", SysEventCode::FileCreate, &event(SysEventCode::FileCreate))
            .unwrap();

        rec.flush(Duration::from_secs(1));
        assert!(!rec.is_tracked(1));
        assert!(!rec.is_tracked(2));
        assert!(exporter.all_spans_stopped());

        let stops_after_first = exporter.stopped_count();
        rec.flush(Duration::from_secs(1));
        assert_eq!(exporter.stopped_count(), stops_after_first);

        // Terminal: later starts are dropped, not errors
        rec.start_process(3, 0, "c.exe", &event(SysEventCode::ProcessCreation))
            .unwrap();
        assert!(!rec.is_tracked(3));
        assert!(rec.counters.snapshot().lifecycle_drops >= 1);
    }

    #[test]
    fn concurrent_starts_yield_one_node_per_pid() {
        use std::thread;

        let (exporter, rec) = recorder();
        let rec = Arc::new(rec);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let rec = rec.clone();
            handles.push(thread::spawn(move || {
                for pid in 0..50i64 {
                    rec.start_process(pid, 0, "w.exe", &event(SysEventCode::ProcessCreation))
                        .unwrap();
                    rec.record_action(pid, "C:/shared", SysEventCode::FileCreate, &event(SysEventCode::FileCreate))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(rec.tracked_count(), 50);
        // 50 process spans + 50 actor spans, regardless of interleaving
        assert_eq!(exporter.created_count(), 100);
        assert_eq!(exporter.started_count(), 100);
    }
}
