//! Process forest - the live mirror of the OS process tree
//!
//! A sharded concurrent map from pid to `ProcessNode`. Each node owns its
//! process span, a log counter and two bounded actor tables (read/recv and
//! write/send) keyed by actor identity. Per-node mutable state sits behind
//! one mutex, which also serializes event attachment so per-pid emission
//! order matches delivery order.
//!
//! Arena-style ownership: nodes never point at each other. Parent links are
//! recorded as span handles and artifact copies taken at create time, so a
//! parent that exits later leaves the child untouched.

use crate::events::{ActorKind, Artifact, ArtifactKind, SysEvent, SysEventCode};
use crate::export::{AttrValue, ExporterAdapter, LogSeverity, SpanHandle};
use crate::recorder::context::{ActorContext, ProcessContext};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A per-artifact, per-direction interaction sub-span
///
/// Created on first matching event, reused for every later one; this bounds
/// sub-spans per process to distinct `(artifact, kind)` pairs.
pub struct ActorNode {
    pub span: SpanHandle,
    pub ctx: ActorContext,
    /// Events attached to this node so far
    pub log_count: u64,
}

/// Mutable per-process state, guarded by the node lock
struct ProcessState {
    /// read/recv actor table, keyed by actor identity
    rr_actors: HashMap<String, ActorNode>,
    /// write/send actor table, keyed by actor identity
    ws_actors: HashMap<String, ActorNode>,
    /// Events attached directly to the process span
    log_count: u64,
    /// Set once the span is stopped; attaches after that are refused
    stopped: bool,
}

/// One live process and its span
pub struct ProcessNode {
    pub pid: i64,
    pub span: SpanHandle,
    pub ctx: ProcessContext,
    state: Mutex<ProcessState>,
}

impl ProcessNode {
    fn new(pid: i64, span: SpanHandle, ctx: ProcessContext) -> Self {
        Self {
            pid,
            span,
            ctx,
            state: Mutex::new(ProcessState {
                rr_actors: HashMap::new(),
                ws_actors: HashMap::new(),
                log_count: 0,
                stopped: false,
            }),
        }
    }

    /// Attach a lifecycle event to the process span itself
    ///
    /// Returns `false` when the node is already stopped (producer race);
    /// the event is dropped in that case.
    pub(crate) fn attach_process_event(
        &self,
        ev: &SysEvent,
        exporter: &dyn ExporterAdapter,
    ) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        state.log_count += 1;
        exporter.emit_log(self.span, ev.to_log_body(), severity_for(ev.code));
        true
    }

    /// Attach an actor event, upserting the `(artifact, kind)` sub-span
    ///
    /// First insertion creates the actor span as a child of the process
    /// span and starts it; later events reuse it. Returns `false` when the
    /// node is already stopped.
    pub(crate) fn attach_actor_event(
        &self,
        artifact: Artifact,
        kind: ActorKind,
        ev: &SysEvent,
        exporter: &dyn ExporterAdapter,
    ) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }

        let identity = format!("{}@{}", artifact.identity(), kind);
        let direction = kind.direction();
        let process_artifact = self.ctx.artifact.clone();
        let parent_span = self.span;

        let table = match direction {
            crate::events::Direction::ReadRecv => &mut state.rr_actors,
            crate::events::Direction::WriteSend => &mut state.ws_actors,
        };

        let node = table.entry(identity.clone()).or_insert_with(|| {
            let span = exporter.create_span(&identity, Some(parent_span));
            exporter.set_attribute(
                span,
                "process.name",
                AttrValue::Str(process_artifact.name.clone()),
            );
            exporter.set_attribute(span, "act.type", AttrValue::Str(direction.as_str().into()));
            exporter.set_attribute(
                span,
                "logsource.product",
                AttrValue::Str(ev.source.as_str().into()),
            );
            exporter.start_span(span, ev.timestamp);
            ActorNode {
                span,
                ctx: ActorContext::new(artifact, kind, process_artifact),
                log_count: 0,
            }
        });
        node.log_count += 1;
        exporter.emit_log(node.span, ev.to_log_body(), severity_for(ev.code));
        true
    }

    /// Stop every actor span, then the process span, stamping the stop-time
    /// attributes (`log.count`, `parent.context`)
    ///
    /// Idempotent; the first call wins.
    pub(crate) fn flush(&self, at: DateTime<Utc>, exporter: &dyn ExporterAdapter) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;

        let rr_drained: Vec<_> = state.rr_actors.drain().collect();
        let ws_drained: Vec<_> = state.ws_actors.drain().collect();
        for (_, actor) in rr_drained.into_iter().chain(ws_drained) {
            exporter.set_attribute(actor.span, "log.count", AttrValue::Int(actor.log_count as i64));
            exporter.set_attribute(
                actor.span,
                "parent.context",
                AttrValue::Str(actor.ctx.parent_identity()),
            );
            exporter.stop_span(actor.span, at);
        }

        exporter.set_attribute(self.span, "log.count", AttrValue::Int(state.log_count as i64));
        if let Some(parent) = self.ctx.parent_identity() {
            exporter.set_attribute(self.span, "parent.context", AttrValue::Str(parent));
        }
        exporter.stop_span(self.span, at);
    }

    /// Snapshot of `(rr, ws)` actor table sizes
    #[cfg(test)]
    pub fn actor_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.rr_actors.len(), state.ws_actors.len())
    }

    /// Log count of a specific actor, if it exists
    #[cfg(test)]
    pub fn actor_log_count(&self, artifact_identity: &str, kind: ActorKind) -> Option<u64> {
        let state = self.state.lock();
        let identity = format!("{artifact_identity}@{kind}");
        let table = match kind.direction() {
            crate::events::Direction::ReadRecv => &state.rr_actors,
            crate::events::Direction::WriteSend => &state.ws_actors,
        };
        table.get(&identity).map(|n| n.log_count)
    }

    #[cfg(test)]
    pub fn log_count(&self) -> u64 {
        self.state.lock().log_count
    }
}

/// Log severity per event code: tampering is an error, cross-process and
/// raw-device reads are warnings, the rest is informational
fn severity_for(code: SysEventCode) -> LogSeverity {
    match code {
        SysEventCode::ProcessTampering => LogSeverity::Error,
        SysEventCode::ProcessAccess
        | SysEventCode::CreateRemoteThread
        | SysEventCode::RawAccessReadDetected => LogSeverity::Warn,
        _ => LogSeverity::Info,
    }
}

/// Concurrent pid → node mapping
pub struct ProcessForest {
    nodes: DashMap<i64, Arc<ProcessNode>>,
    exporter: Arc<dyn ExporterAdapter>,
}

impl ProcessForest {
    pub fn new(exporter: Arc<dyn ExporterAdapter>) -> Self {
        Self {
            nodes: DashMap::new(),
            exporter,
        }
    }

    /// Upsert the node for `pid`
    ///
    /// On creation the parent pid is resolved in the same map: if tracked,
    /// the new span is a child of the parent's span; otherwise it is a
    /// root. Resolution is best-effort at create time, never retroactive.
    pub fn get_or_create(
        &self,
        pid: i64,
        ppid: i64,
        image: &str,
        ev: &SysEvent,
    ) -> (Arc<ProcessNode>, bool) {
        // Resolve the parent before taking the entry lock; entry + lookup
        // on the same shard would deadlock.
        let parent = self
            .nodes
            .get(&ppid)
            .map(|p| (p.span, p.ctx.artifact.clone()));

        match self.nodes.entry(pid) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let artifact = Artifact {
                    kind: ArtifactKind::Process,
                    name: image.to_string(),
                };
                let (parent_span, parent_artifact) = match parent {
                    Some((span, artifact)) => (Some(span), Some(artifact)),
                    None => (None, None),
                };
                let ctx = ProcessContext::new(artifact, parent_artifact);

                let span = self.exporter.create_span(&ctx.identity(), parent_span);
                self.exporter
                    .set_attribute(span, "process.name", AttrValue::Str(image.to_string()));
                self.exporter
                    .set_attribute(span, "act.type", AttrValue::Str("launch".into()));
                self.exporter.set_attribute(
                    span,
                    "logsource.product",
                    AttrValue::Str(ev.source.as_str().into()),
                );
                self.exporter.start_span(span, ev.timestamp);

                let node = Arc::new(ProcessNode::new(pid, span, ctx));
                entry.insert(node.clone());
                (node, true)
            }
        }
    }

    pub fn lookup(&self, pid: i64) -> Option<Arc<ProcessNode>> {
        self.nodes.get(&pid).map(|n| Arc::clone(&n))
    }

    pub fn contains(&self, pid: i64) -> bool {
        self.nodes.contains_key(&pid)
    }

    /// Remove the node for `pid` without stopping its spans
    ///
    /// Removal happens before the span stop so no caller can observe a
    /// tracked node whose span is already stopped.
    pub fn remove(&self, pid: i64) -> Option<Arc<ProcessNode>> {
        self.nodes.remove(&pid).map(|(_, node)| node)
    }

    /// Remove and flush every node
    pub fn flush_all(&self, at: DateTime<Utc>) {
        let pids: Vec<i64> = self.nodes.iter().map(|e| *e.key()).collect();
        for pid in pids {
            if let Some(node) = self.remove(pid) {
                node.flush(at, self.exporter.as_ref());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(dead_code)] // Public API for introspection
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSource, SysEventCode};
    use crate::export::RecordingExporter;

    fn event(code: SysEventCode) -> SysEvent {
        SysEvent {
            code,
            timestamp: Utc::now(),
            source: EventSource::Sysmon,
            metadata: serde_json::Map::new(),
        }
    }

    fn forest() -> (Arc<RecordingExporter>, ProcessForest) {
        let exporter = Arc::new(RecordingExporter::new());
        let forest = ProcessForest::new(exporter.clone());
        (exporter, forest)
    }

    #[test]
    fn create_then_reuse() {
        let (exporter, forest) = forest();
        let ev = event(SysEventCode::ProcessCreation);
        let (first, created) = forest.get_or_create(100, 0, "a.exe", &ev);
        assert!(created);
        let (second, created) = forest.get_or_create(100, 0, "a.exe", &ev);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        // One span created and started, despite two upserts
        assert_eq!(exporter.created_count(), 1);
        assert_eq!(exporter.started_count(), 1);
    }

    #[test]
    fn child_span_parents_to_tracked_ppid() {
        let (exporter, forest) = forest();
        let ev = event(SysEventCode::ProcessCreation);
        let (parent, _) = forest.get_or_create(100, 0, "a.exe", &ev);
        let (child, _) = forest.get_or_create(200, 100, "b.exe", &ev);
        assert_eq!(exporter.parent_of(child.span), Some(parent.span));
        assert_eq!(child.ctx.parent_identity().as_deref(), Some("a.exe@Process@LAUNCH"));
    }

    #[test]
    fn orphan_child_is_a_root() {
        let (exporter, forest) = forest();
        let ev = event(SysEventCode::ProcessCreation);
        let (orphan, _) = forest.get_or_create(300, 999, "c.exe", &ev);
        assert_eq!(exporter.parent_of(orphan.span), None);
        assert!(orphan.ctx.parent.is_none());
    }

    #[test]
    fn actor_upsert_deduplicates() {
        let (exporter, forest) = forest();
        let ev = event(SysEventCode::FileCreate);
        let (node, _) = forest.get_or_create(400, 0, "d.exe", &event(SysEventCode::ProcessCreation));

        let file = Artifact::new(ArtifactKind::File, "C:/x.txt").unwrap();
        for _ in 0..3 {
            assert!(node.attach_actor_event(file.clone(), ActorKind::Create, &ev, exporter.as_ref()));
        }
        let (rr, ws) = node.actor_counts();
        assert_eq!((rr, ws), (0, 1));
        assert_eq!(node.actor_log_count("C:/x.txt@File", ActorKind::Create), Some(3));
        // Process span + one actor span
        assert_eq!(exporter.created_count(), 2);
    }

    #[test]
    fn directions_split_into_separate_tables() {
        let (exporter, forest) = forest();
        let (node, _) = forest.get_or_create(500, 0, "e.exe", &event(SysEventCode::ProcessCreation));

        let module = Artifact::new(ArtifactKind::Module, "mod.dll").unwrap();
        let file = Artifact::new(ArtifactKind::File, "mod.dll").unwrap();
        node.attach_actor_event(module, ActorKind::Load, &event(SysEventCode::ImageLoad), exporter.as_ref());
        node.attach_actor_event(file, ActorKind::Modify, &event(SysEventCode::FileModified), exporter.as_ref());

        assert_eq!(node.actor_counts(), (1, 1));
    }

    #[test]
    fn flush_stops_actors_then_process_with_attributes() {
        let (exporter, forest) = forest();
        let (node, _) = forest.get_or_create(600, 0, "f.exe", &event(SysEventCode::ProcessCreation));
        node.attach_process_event(&event(SysEventCode::ProcessCreation), exporter.as_ref());
        let file = Artifact::new(ArtifactKind::File, "C:/y.txt").unwrap();
        node.attach_actor_event(file, ActorKind::Create, &event(SysEventCode::FileCreate), exporter.as_ref());

        node.flush(Utc::now(), exporter.as_ref());

        assert!(exporter.all_spans_stopped());
        assert_eq!(
            exporter.attr_of(node.span, "log.count"),
            Some(AttrValue::Int(1))
        );
        // The actor span carries its own count and its parent identity
        let ops = exporter.ops();
        let actor_span = ops
            .iter()
            .find_map(|op| match op {
                crate::export::EmitOp::Create { handle, parent, .. }
                    if *parent == Some(node.span) =>
                {
                    Some(*handle)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(
            exporter.attr_of(actor_span, "log.count"),
            Some(AttrValue::Int(1))
        );
        assert_eq!(
            exporter.attr_of(actor_span, "parent.context"),
            Some(AttrValue::Str("f.exe@Process@LAUNCH".into()))
        );
    }

    #[test]
    fn attaches_refused_after_flush() {
        let (exporter, forest) = forest();
        let (node, _) = forest.get_or_create(700, 0, "g.exe", &event(SysEventCode::ProcessCreation));
        node.flush(Utc::now(), exporter.as_ref());

        assert!(!node.attach_process_event(&event(SysEventCode::ThreadStart), exporter.as_ref()));
        let file = Artifact::new(ArtifactKind::File, "C:/z.txt").unwrap();
        assert!(!node.attach_actor_event(file, ActorKind::Create, &event(SysEventCode::FileCreate), exporter.as_ref()));
        // Double flush is a no-op
        node.flush(Utc::now(), exporter.as_ref());
        assert_eq!(exporter.stopped_count(), 1);
    }

    #[test]
    fn flush_all_empties_the_forest() {
        let (exporter, forest) = forest();
        let ev = event(SysEventCode::ProcessCreation);
        forest.get_or_create(1, 0, "a.exe", &ev);
        forest.get_or_create(2, 1, "b.exe", &ev);
        forest.get_or_create(3, 0, "c.exe", &ev);
        assert_eq!(forest.len(), 3);

        forest.flush_all(Utc::now());
        assert!(forest.is_empty());
        assert!(exporter.all_spans_stopped());
        assert_eq!(exporter.stopped_count(), 3);
    }
}
