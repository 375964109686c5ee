//! Registry-interest ruleset
//!
//! Registry activity is far too chatty to forward wholesale, and most of it
//! is component-servicing noise. The ruleset keeps only keys that matter for
//! persistence and configuration tampering: default-deny with an explicit
//! allow list, and an exclude list evaluated first.
//!
//! The pattern lists live in `src/data/registry_rules.toml` (compiled in,
//! overridable via `registry_rules_path` in the config) so the host
//! convention can evolve without touching recorder code. Matching is
//! case-insensitive substring; a pattern ending in `$` anchors at the end
//! of the key instead.

use crate::error::{AgentError, Result};
use serde::Deserialize;
use std::path::Path;

/// Default ruleset compiled into the binary
const EMBEDDED_RULES: &str = include_str!("../data/registry_rules.toml");

/// Pattern lists as loaded from the TOML data file
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryRuleset {
    /// Known-noise key patterns, evaluated before anything else
    exclude: Vec<String>,
    /// Persistence / tampering surfaces that make an event interesting
    include: Vec<String>,
    /// Process basenames that make any registry event interesting
    editor_processes: Vec<String>,
}

impl RegistryRuleset {
    /// The embedded default ruleset
    ///
    /// The data file ships inside the binary; a parse failure is a build
    /// defect, caught by the test below, so this cannot fail at runtime.
    pub fn embedded() -> Self {
        toml::from_str::<Self>(EMBEDDED_RULES)
            .unwrap_or_else(|e| panic!("embedded registry ruleset is invalid: {e}"))
            .normalized()
    }

    /// Load a ruleset override from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read registry rules {}: {e}", path.display()))
        })?;
        let rules: Self = toml::from_str(&raw).map_err(|e| {
            AgentError::Config(format!("bad registry rules {}: {e}", path.display()))
        })?;
        Ok(rules.normalized())
    }

    /// Lowercase every pattern once so matching never re-lowercases them
    fn normalized(mut self) -> Self {
        for list in [
            &mut self.exclude,
            &mut self.include,
            &mut self.editor_processes,
        ] {
            for p in list.iter_mut() {
                *p = p.to_lowercase();
            }
        }
        self
    }

    /// Decide whether a registry event is worth recording
    ///
    /// Pure function of `(key_name, process_image)`: equal inputs always
    /// yield equal outputs.
    pub fn is_interesting(&self, key_name: &str, process_image: &str) -> bool {
        let key = key_name.to_lowercase();

        // Exclusions win over everything, including editor processes.
        if self.exclude.iter().any(|p| pattern_matches(p, &key)) {
            return false;
        }

        // Registry editors and bare device-path processes are always of
        // interest, whatever key they touch.
        let image = process_image.to_lowercase();
        if image.starts_with('\\') {
            return true;
        }
        let basename = image.rsplit(['\\', '/']).next().unwrap_or(&image);
        if self.editor_processes.iter().any(|p| p == basename) {
            return true;
        }

        // Default-deny: only explicitly allowed surfaces pass.
        self.include.iter().any(|p| pattern_matches(p, &key))
    }
}

/// Substring match, or suffix match for patterns ending in `$`
///
/// Both sides are already lowercased.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('$') {
        Some(anchored) => key.ends_with(anchored),
        None => key.contains(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RegistryRuleset {
        RegistryRuleset::embedded()
    }

    #[test]
    fn embedded_ruleset_parses() {
        let r = rules();
        assert!(!r.exclude.is_empty());
        assert!(!r.include.is_empty());
        assert!(!r.editor_processes.is_empty());
    }

    #[test]
    fn run_key_is_interesting() {
        assert!(rules().is_interesting(
            "HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run\\X",
            "C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\powershell.exe"
        ));
    }

    #[test]
    fn component_cache_is_noise() {
        assert!(!rules().is_interesting(
            "HKLM\\COMPONENTS\\foo",
            "C:\\Windows\\System32\\svchost.exe"
        ));
    }

    #[test]
    fn registry_editor_makes_any_key_interesting() {
        assert!(rules().is_interesting(
            "HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run",
            "regedit.exe"
        ));
        // Even keys that are not on the allow list
        assert!(rules().is_interesting(
            "HKCU\\Software\\SomeVendor\\Random",
            "C:\\Windows\\regedit.exe"
        ));
    }

    #[test]
    fn exclusions_beat_editor_processes() {
        assert!(!rules().is_interesting("HKLM\\COMPONENTS\\bar", "regedit.exe"));
    }

    #[test]
    fn backslash_process_path_is_interesting() {
        assert!(rules().is_interesting(
            "HKCU\\Software\\SomeVendor\\Random",
            "\\payload.exe"
        ));
    }

    #[test]
    fn service_start_values() {
        let r = rules();
        // Arbitrary service Start flips are persistence-relevant...
        assert!(r.is_interesting(
            "HKLM\\SYSTEM\\CurrentControlSet\\Services\\EvilSvc\\Start",
            "cmd.exe"
        ));
        // ...but the benign auto-maintenance services are known noise.
        assert!(!r.is_interesting(
            "HKLM\\SYSTEM\\CurrentControlSet\\Services\\BITS\\Start",
            "svchost.exe"
        ));
    }

    #[test]
    fn winlogon_and_ifeo_pass() {
        let r = rules();
        assert!(r.is_interesting(
            "HKLM\\SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Winlogon\\Shell",
            "evil.exe"
        ));
        assert!(r.is_interesting(
            "HKLM\\SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Image File Execution Options\\sethc.exe\\Debugger",
            "cmd.exe"
        ));
    }

    #[test]
    fn random_application_key_is_denied_by_default() {
        assert!(!rules().is_interesting(
            "HKCU\\Software\\SomeVendor\\WindowPlacement",
            "someapp.exe"
        ));
    }

    #[test]
    fn pure_function_equal_inputs_equal_outputs() {
        let r = rules();
        let key = "HKLM\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run\\X";
        let first = r.is_interesting(key, "powershell.exe");
        for _ in 0..10 {
            assert_eq!(first, r.is_interesting(key, "powershell.exe"));
        }
    }

    #[test]
    fn matching_is_case_insensitive() {
        let r = rules();
        assert!(r.is_interesting(
            "hklm\\software\\microsoft\\windows\\currentversion\\RUN\\x",
            "POWERSHELL.EXE"
        ));
    }
}
