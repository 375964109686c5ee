// Startup module - banner, module status and the collector health probe
//
// Runs before the recorder starts consuming events:
// - Version info and effective endpoint
// - Module loading status with checkmarks
// - Health probe against the collector's healthcheck extension

use crate::config::{Config, VERSION};
use std::time::Duration;

/// Exit codes for the CLI host
pub mod exit {
    /// Normal shutdown
    pub const OK: i32 = 0;
    /// Missing or invalid configuration
    pub const CONFIG_ERROR: i32 = 1;
    /// Producer bootstrap refused to attach (kernel tracing needs elevation)
    #[allow(dead_code)] // Producers are external; reserved for their bootstrap
    pub const INSUFFICIENT_PRIVILEGES: i32 = 2;
    /// Collector unreachable at startup
    pub const COLLECTOR_UNREACHABLE: i32 = 3;
}

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Module loading result for display
pub struct ModuleStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: &'static str,
}

/// Print the startup banner and module loading status
pub fn print_startup(config: &Config) {
    use colors::*;

    // Banner
    println!();
    println!("  {BOLD}{CYAN}sysspan{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}System activity as OpenTelemetry spans{RESET}");
    println!();

    // Config file status
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    // Module loading
    println!("  {DIM}Loading modules...{RESET}");
    for module in get_module_status(config) {
        print_module_status(&module);
    }
    println!();

    // Collector info
    println!(
        "  {MAGENTA}▸{RESET} Exporting to {BOLD}{}{RESET}",
        config.collector_endpoint()
    );
    if config.demo_mode {
        println!("  {YELLOW}▸{RESET} {YELLOW}Demo mode active{RESET} {DIM}(synthetic events){RESET}");
    }
    println!();
}

/// Get status of all modules based on config
fn get_module_status(config: &Config) -> Vec<ModuleStatus> {
    vec![
        ModuleStatus {
            name: "decoder",
            enabled: true, // Core, always on
            description: "Raw record decoding",
        },
        ModuleStatus {
            name: "filter",
            enabled: true, // Core, always on
            description: "Self-exclusion and registry interest",
        },
        ModuleStatus {
            name: "recorder",
            enabled: true, // Core, always on
            description: "Process forest and span lifecycle",
        },
        ModuleStatus {
            name: "exporter",
            enabled: true, // Core, always on
            description: "OTLP trace and log export",
        },
        ModuleStatus {
            name: "file-logging",
            enabled: config.logging.file_enabled,
            description: "Rotating agent log files",
        },
        ModuleStatus {
            name: "demo",
            enabled: config.demo_mode,
            description: "Synthetic host activity",
        },
    ]
}

fn print_module_status(module: &ModuleStatus) {
    use colors::*;
    if module.enabled {
        println!(
            "    {GREEN}✓{RESET} {:<14} {DIM}{}{RESET}",
            module.name, module.description
        );
    } else {
        println!(
            "    {DIM}○ {:<14} {}{RESET}",
            module.name, module.description
        );
    }
}

/// Probe the collector's healthcheck extension
///
/// Any HTTP response counts as reachable - the probe is about network
/// reachability, not collector health semantics.
pub async fn probe_collector(config: &Config) -> bool {
    let url = config.health_probe_url();
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("cannot build health probe client: {e}");
            return false;
        }
    };

    match client.get(&url).send().await {
        Ok(response) => {
            tracing::info!(status = %response.status(), url, "collector health probe ok");
            true
        }
        Err(e) => {
            tracing::error!(url, "collector health probe failed: {e}");
            false
        }
    }
}
