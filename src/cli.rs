// CLI module - command-line argument parsing and handlers
//
// The agent runs with no subcommand; `config` provides small helpers for
// managing the configuration file:
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --reset: Regenerate config file with defaults

use crate::config::{Config, VERSION};
use clap::{Parser, Subcommand};

/// sysspan - system activity to OpenTelemetry spans
#[derive(Parser)]
#[command(name = "sysspan")]
#[command(version = VERSION)]
#[command(about = "Host telemetry agent: system activity as OpenTelemetry spans", long_about = None)]
pub struct Cli {
    /// Generate synthetic host activity instead of waiting for producers
    #[arg(long)]
    pub demo: bool,

    /// Skip the collector health probe at startup
    #[arg(long)]
    pub no_health_probe: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Handle a `config` subcommand. Returns the process exit code.
pub fn handle_config(_show: bool, reset: bool, path: bool) -> i32 {
    if path {
        match Config::config_path() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("no config directory on this platform"),
        }
        return 0;
    }

    if reset {
        let Some(p) = Config::config_path() else {
            eprintln!("no config directory on this platform");
            return 1;
        };
        if let Some(dir) = p.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("cannot create {}: {e}", dir.display());
                return 1;
            }
        }
        if let Err(e) = std::fs::write(&p, Config::default().to_toml()) {
            eprintln!("cannot write {}: {e}", p.display());
            return 1;
        }
        println!("wrote defaults to {}", p.display());
        return 0;
    }

    // --show is the default action
    match Config::load() {
        Ok(config) => {
            print!("{}", config.to_toml());
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
