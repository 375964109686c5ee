//! Event filtering - self-exclusion, user exclusion, registry interest
//!
//! Filters compose as a `FilterPipeline` value: a set of pre-decode and
//! post-decode predicates plus the decode step itself. All predicates must
//! pass (logical AND) for an event to enter the recorder. Drops are counted,
//! never raised as errors.

pub mod registry;

use crate::error::{AgentError, Result};
use crate::events::{SysEvent, SysEventCode};
use crate::metrics::DropCounters;
use crate::parser::{self, models::RawRecord};
use regex::Regex;
use registry::RegistryRuleset;
use std::path::PathBuf;
use std::sync::Arc;

/// The agent's own identity, captured once at startup
///
/// Process-wide and immutable: the pipeline holds it by value, there is no
/// global mutable state to race on.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Our own pid; events originating here are never observed
    pub pid: i64,
    /// Full path of the agent binary, for image-based self-exclusion
    pub binary_path: String,
}

impl AgentIdentity {
    /// Capture the running process's identity
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| AgentError::Config(format!("cannot resolve own binary path: {e}")))?;
        Ok(Self {
            pid: std::process::id() as i64,
            binary_path: exe.to_string_lossy().into_owned(),
        })
    }

    /// Fixed identity, for tests
    #[cfg(test)]
    pub fn with(pid: i64, binary_path: impl Into<String>) -> Self {
        Self {
            pid,
            binary_path: binary_path.into(),
        }
    }
}

/// Composable pre/post-decode predicate chain
pub struct FilterPipeline {
    identity: AgentIdentity,
    /// OS idle/system pseudo-process (conventionally pid 4)
    system_idle_pid: i64,
    excluded_users: Vec<Regex>,
    registry_rules: RegistryRuleset,
    counters: Arc<DropCounters>,
}

impl FilterPipeline {
    pub fn new(
        identity: AgentIdentity,
        system_idle_pid: i64,
        excluded_users: &[String],
        registry_rules: RegistryRuleset,
        counters: Arc<DropCounters>,
    ) -> Result<Self> {
        let excluded_users = excluded_users
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| AgentError::Config(format!("bad excluded_users pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identity,
            system_idle_pid,
            excluded_users,
            registry_rules,
            counters,
        })
    }

    /// Run the full admission chain: pre-filter, decode, post-filter
    ///
    /// Returns the decoded event only if every stage passes; every drop is
    /// counted under the stage that rejected it.
    pub fn admit(&self, value: serde_json::Value) -> Option<SysEvent> {
        let record = match RawRecord::from_value(value) {
            Some(r) => r,
            None => {
                self.counters.inc_decode();
                return None;
            }
        };

        if !self.pre_decode(&record) {
            self.counters.inc_prefilter();
            return None;
        }

        let event = match parser::decode_record(record) {
            Some(ev) => ev,
            None => {
                self.counters.inc_decode();
                return None;
            }
        };

        if !self.post_decode(&event) {
            self.counters.inc_postfilter();
            return None;
        }

        Some(event)
    }

    /// Pre-decode predicates over the raw payload (pid fields only)
    pub fn pre_decode(&self, record: &RawRecord) -> bool {
        match record.pid() {
            Some(pid) if pid == self.identity.pid => false,
            Some(pid) if pid == self.system_idle_pid => false,
            _ => true,
        }
    }

    /// Post-decode predicates over the typed event
    pub fn post_decode(&self, event: &SysEvent) -> bool {
        // Excluded user accounts
        if let Some(user) = event.user() {
            if self.excluded_users.iter().any(|re| re.is_match(user)) {
                return false;
            }
        }

        // Anything whose image is the agent binary itself
        for field in ["Image", "SourceImage"] {
            if let Some(image) = event.field_str(field) {
                if image.eq_ignore_ascii_case(&self.identity.binary_path) {
                    return false;
                }
            }
        }

        // Cross-process events aimed at the agent
        if matches!(
            event.code,
            SysEventCode::ProcessAccess | SysEventCode::CreateRemoteThread
        ) && event.target_pid() == Some(self.identity.pid)
        {
            return false;
        }

        // Registry events must survive the interest ruleset
        if event.code.is_registry() {
            let key = match event.target() {
                Some(k) => k,
                None => return false,
            };
            let process = event.image().unwrap_or_default();
            if !self.registry_rules.is_interesting(key, process) {
                return false;
            }
        }

        true
    }
}

/// Load the registry ruleset: from the configured path when set, otherwise
/// the embedded defaults
pub fn load_registry_rules(path: Option<&PathBuf>) -> Result<RegistryRuleset> {
    match path {
        Some(p) => RegistryRuleset::from_path(p),
        None => Ok(RegistryRuleset::embedded()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline(agent_pid: i64) -> FilterPipeline {
        FilterPipeline::new(
            AgentIdentity::with(agent_pid, "C:\\Program Files\\sysspan\\sysspan.exe"),
            4,
            &[r"(?i)^NT AUTHORITY\\SYSTEM$".to_string()],
            RegistryRuleset::embedded(),
            Arc::new(DropCounters::new()),
        )
        .unwrap()
    }

    #[test]
    fn drops_own_pid_before_decode() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({"event_id": 1, "data": {"ProcessId": "999", "Image": "x.exe"}}))
            .is_none());
        assert_eq!(p.counters.snapshot().events_dropped_prefilter, 1);
    }

    #[test]
    fn drops_system_idle_pid() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({"event_id": 1, "data": {"ProcessId": "4", "Image": "idle"}}))
            .is_none());
    }

    #[test]
    fn drops_excluded_user() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 1,
                "data": {"ProcessId": "10", "Image": "x.exe", "User": "NT AUTHORITY\\SYSTEM"}
            }))
            .is_none());
        assert_eq!(p.counters.snapshot().events_dropped_postfilter, 1);
    }

    #[test]
    fn keeps_ordinary_user() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 1,
                "data": {"ProcessId": "10", "Image": "x.exe", "User": "CORP\\alice"}
            }))
            .is_some());
    }

    #[test]
    fn drops_events_from_own_binary() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 11,
                "data": {
                    "ProcessId": "10",
                    "Image": "C:\\Program Files\\sysspan\\SYSSPAN.EXE",
                    "TargetFilename": "C:\\tmp\\x"
                }
            }))
            .is_none());
    }

    #[test]
    fn drops_access_events_targeting_agent() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 10,
                "data": {
                    "SourceProcessId": "10",
                    "TargetProcessId": "999",
                    "SourceImage": "C:\\evil.exe",
                    "TargetImage": "C:\\Program Files\\sysspan\\sysspan.exe"
                }
            }))
            .is_none());
    }

    #[test]
    fn registry_noise_is_filtered() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 13,
                "data": {
                    "ProcessId": "10",
                    "Image": "C:\\Windows\\System32\\svchost.exe",
                    "TargetObject": "HKLM\\COMPONENTS\\DerivedData\\foo"
                }
            }))
            .is_none());
    }

    #[test]
    fn registry_persistence_key_passes() {
        let p = pipeline(999);
        assert!(p
            .admit(json!({
                "event_id": 13,
                "data": {
                    "ProcessId": "10",
                    "Image": "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe",
                    "TargetObject": "HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run\\Updater"
                }
            }))
            .is_some());
    }
}
