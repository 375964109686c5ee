// Demo mode: synthetic host activity to exercise the full pipeline
//
// Generates raw records that look like a real workstation session - a
// process tree spawning children, writing files, touching autorun keys,
// resolving names and injecting into a sibling - and pushes them through
// the same admission path real producers use (pre-filter, decode,
// post-filter, recorder).
//
// Run with: sysspan --demo

use crate::events::{SysEvent, SysEventCode};
use crate::filter::FilterPipeline;
use crate::recorder::SystemActivityRecorder;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::sleep;

/// Deliver one admitted event to the right recorder operation
///
/// This is the producer-side dispatch: lifecycle codes drive the forest,
/// cross-process codes resolve their target pid, everything else is an
/// actor event.
pub fn deliver(recorder: &SystemActivityRecorder, ev: &SysEvent) {
    let result = match ev.code {
        SysEventCode::ProcessCreation => {
            let (Some(pid), Some(image)) = (ev.pid(), ev.image()) else {
                return;
            };
            let ppid = ev.ppid().unwrap_or(0);
            recorder.start_process(pid, ppid, image, ev)
        }
        SysEventCode::ProcessTerminated => {
            let Some(pid) = ev.pid() else { return };
            recorder.stop_process(pid, ev)
        }
        SysEventCode::ProcessAccess | SysEventCode::CreateRemoteThread => {
            let (Some(src), Some(tgt), Some(fallback)) =
                (ev.pid(), ev.target_pid(), ev.target())
            else {
                return;
            };
            recorder.record_process_access(src, tgt, fallback, ev.code, ev)
        }
        _ => {
            let (Some(pid), Some(target)) = (ev.pid(), ev.target()) else {
                return;
            };
            recorder.record_action(pid, target, ev.code, ev)
        }
    };

    if let Err(e) = result {
        tracing::warn!(code = %ev.code, "demo event rejected: {e}");
    }
}

/// Generate waves of synthetic activity until shutdown
pub async fn run_demo(
    recorder: Arc<SystemActivityRecorder>,
    filter: Arc<FilterPipeline>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tracing::info!("demo producer started");
    let mut wave = 0i64;

    loop {
        let base_pid = 1000 + wave * 100;
        for (record, delay_ms) in generate_wave(base_pid) {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("demo producer received shutdown signal");
                return;
            }
            if let Some(ev) = filter.admit(record) {
                deliver(&recorder, &ev);
            }
            sleep(Duration::from_millis(delay_ms)).await;
        }
        wave += 1;

        // Pause between waves, but stay responsive to shutdown
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::info!("demo producer received shutdown signal");
                return;
            }
            _ = sleep(Duration::from_secs(5)) => {}
        }
    }
}

/// One wave: a small process tree doing typical (and one suspicious) things
fn generate_wave(base: i64) -> Vec<(Value, u64)> {
    let explorer = base;
    let shell = base + 1;
    let child = base + 2;
    let user = "CORP\\demo";

    vec![
        (
            sysmon(1, json!({
                "ProcessId": explorer.to_string(),
                "ParentProcessId": "400",
                "Image": "C:\\Windows\\explorer.exe",
                "User": user,
            })),
            300,
        ),
        (
            sysmon(1, json!({
                "ProcessId": shell.to_string(),
                "ParentProcessId": explorer.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "CommandLine": "powershell -nop -w hidden",
                "User": user,
            })),
            250,
        ),
        (
            sysmon(11, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "TargetFilename": "C:\\Users\\demo\\AppData\\Roaming\\update.ps1",
                "User": user,
            })),
            200,
        ),
        (
            sysmon(13, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "EventType": "SetValue",
                "TargetObject": "HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run\\Updater",
                "Details": "powershell -File C:\\Users\\demo\\AppData\\Roaming\\update.ps1",
                "User": user,
            })),
            200,
        ),
        (
            sysmon(22, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "QueryName": "cdn.example.net",
                "User": user,
            })),
            150,
        ),
        (
            sysmon(3, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "DestinationIp": "203.0.113.10",
                "DestinationPort": "443",
                "User": user,
            })),
            150,
        ),
        (
            sysmon(7, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "ImageLoaded": "C:\\Windows\\System32\\amsi.dll",
                "User": user,
            })),
            150,
        ),
        (
            sysmon(8, json!({
                "SourceProcessId": shell.to_string(),
                "TargetProcessId": explorer.to_string(),
                "SourceImage": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "TargetImage": "C:\\Windows\\explorer.exe",
                "User": user,
            })),
            250,
        ),
        (
            sysmon(1, json!({
                "ProcessId": child.to_string(),
                "ParentProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\cmd.exe",
                "User": user,
            })),
            200,
        ),
        (
            sysmon(11, json!({
                "ProcessId": child.to_string(),
                "Image": "C:\\Windows\\System32\\cmd.exe",
                "TargetFilename": "C:\\Users\\demo\\AppData\\Local\\Temp\\out.tmp",
                "User": user,
            })),
            200,
        ),
        (
            sysmon(5, json!({
                "ProcessId": child.to_string(),
                "Image": "C:\\Windows\\System32\\cmd.exe",
                "User": user,
            })),
            250,
        ),
        (
            sysmon(5, json!({
                "ProcessId": shell.to_string(),
                "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                "User": user,
            })),
            250,
        ),
    ]
}

/// Wrap a payload in the operational-log envelope
fn sysmon(event_id: i64, data: Value) -> Value {
    json!({
        "source": "sysmon",
        "event_id": event_id,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::RecordingExporter;
    use crate::filter::{registry::RegistryRuleset, AgentIdentity};
    use crate::metrics::DropCounters;

    #[test]
    fn a_full_wave_drives_the_recorder_end_to_end() {
        let counters = Arc::new(DropCounters::new());
        let filter = FilterPipeline::new(
            AgentIdentity::with(999_999, "C:\\Program Files\\sysspan\\sysspan.exe"),
            4,
            &[r"(?i)^NT AUTHORITY\\SYSTEM$".to_string()],
            RegistryRuleset::embedded(),
            counters.clone(),
        )
        .unwrap();
        let exporter = Arc::new(RecordingExporter::new());
        let recorder = SystemActivityRecorder::new(exporter.clone(), counters);

        for (record, _) in generate_wave(1000) {
            if let Some(ev) = filter.admit(record) {
                deliver(&recorder, &ev);
            }
        }

        // The two terminations leave only explorer tracked
        assert!(recorder.is_tracked(1000));
        assert!(!recorder.is_tracked(1001));
        assert!(!recorder.is_tracked(1002));

        // Self-originated records never reach the recorder
        assert!(filter
            .admit(sysmon(1, serde_json::json!({
                "ProcessId": "999999",
                "Image": "C:\\Program Files\\sysspan\\sysspan.exe",
            })))
            .is_none());
        assert!(!recorder.is_tracked(999_999));

        // Three process spans plus powershell's actor sub-spans
        assert!(exporter.created_count() > 3);

        recorder.flush(Duration::from_secs(1));
        assert!(exporter.all_spans_stopped());
    }
}
