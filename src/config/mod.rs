//! Agent configuration
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/sysspan/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The agent's own pid and binary path are derived at runtime and are never
//! read from configuration.

use crate::error::{AgentError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;


/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SYSSPAN_";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Effective agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OTLP collector host
    pub collector_host: String,

    /// OTLP collector gRPC port
    pub collector_port: u16,

    /// Resource attribute `service.name` and tracer/logger name
    pub service_name: String,

    /// Collector healthcheck-extension port, probed before start
    pub health_probe_port: u16,

    /// OS idle/system pseudo-process pid (conventionally 4)
    pub system_idle_pid: i64,

    /// User names whose events are dropped (regex patterns)
    pub excluded_users: Vec<String>,

    /// Override for the embedded registry-interest ruleset
    pub registry_rules_path: Option<PathBuf>,

    /// Demo mode: drive the recorder with synthetic host activity
    pub demo_mode: bool,

    /// Exporter tuning
    pub exporter: ExporterConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Exporter queue and deadline tuning
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Command queue capacity before drop-oldest kicks in
    pub queue_capacity: usize,
    /// Deadline for draining queued telemetry on flush
    pub flush_timeout_secs: u64,
    /// Deadline for the final flush + exporter release
    pub shutdown_timeout_secs: u64,
}

impl ExporterConfig {
    pub fn flush_deadline(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8192,
            flush_timeout_secs: 5,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Log file rotation strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LogRotation {
    /// Rotate log files hourly
    Hourly,
    /// Rotate log files daily (default)
    #[default]
    Daily,
    /// Never rotate - single log file
    Never,
}

impl LogRotation {
    /// Parse rotation string from config
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "daily" => Self::Daily,
            "never" => Self::Never,
            _ => Self::Daily, // Default to daily for unknown values
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Never => "never",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Enable file logging in addition to stdout
    pub file_enabled: bool,
    /// Directory for log files
    pub file_dir: PathBuf,
    /// Log file rotation strategy
    pub file_rotation: LogRotation,
    /// Prefix for log file names (e.g., "sysspan" -> "sysspan.2024-01-15.log")
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false, // Opt-in feature
            file_dir: PathBuf::from("./logs"),
            file_rotation: LogRotation::Daily,
            file_prefix: "sysspan".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_host: "127.0.0.1".to_string(),
            collector_port: 4317,
            service_name: "sysspan".to_string(),
            health_probe_port: 13133,
            system_idle_pid: 4,
            excluded_users: vec![r"(?i)^NT AUTHORITY\\SYSTEM$".to_string()],
            registry_rules_path: None,
            demo_mode: false,
            exporter: ExporterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the effective configuration: defaults, then file, then env
    pub fn load() -> Result<Self> {
        let file = match Self::config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    AgentError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    AgentError::Config(format!("cannot parse {}: {e}", path.display()))
                })?
            }
            _ => FileConfig::default(),
        };

        let mut config = Self::from_file(file);
        config.apply_env(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sysspan").join("config.toml"))
    }

    /// OTLP endpoint URL
    pub fn collector_endpoint(&self) -> String {
        format!("http://{}:{}", self.collector_host, self.collector_port)
    }

    /// Healthcheck URL probed at startup
    pub fn health_probe_url(&self) -> String {
        format!("http://{}:{}/", self.collector_host, self.health_probe_port)
    }

    /// Merge file values over defaults
    pub fn from_file(file: FileConfig) -> Self {
        let defaults = Self::default();
        let exporter = file.exporter.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();
        let logging_defaults = LoggingConfig::default();
        let exporter_defaults = ExporterConfig::default();

        Self {
            collector_host: file.collector_host.unwrap_or(defaults.collector_host),
            collector_port: file.collector_port.unwrap_or(defaults.collector_port),
            service_name: file.service_name.unwrap_or(defaults.service_name),
            health_probe_port: file.health_probe_port.unwrap_or(defaults.health_probe_port),
            system_idle_pid: file.system_idle_pid.unwrap_or(defaults.system_idle_pid),
            excluded_users: file.excluded_users.unwrap_or(defaults.excluded_users),
            registry_rules_path: file.registry_rules_path.map(PathBuf::from),
            demo_mode: file.demo_mode.unwrap_or(defaults.demo_mode),
            exporter: ExporterConfig {
                queue_capacity: exporter
                    .queue_capacity
                    .unwrap_or(exporter_defaults.queue_capacity),
                flush_timeout_secs: exporter
                    .flush_timeout_secs
                    .unwrap_or(exporter_defaults.flush_timeout_secs),
                shutdown_timeout_secs: exporter
                    .shutdown_timeout_secs
                    .unwrap_or(exporter_defaults.shutdown_timeout_secs),
            },
            logging: LoggingConfig {
                level: logging.level.unwrap_or(logging_defaults.level),
                file_enabled: logging.file_enabled.unwrap_or(logging_defaults.file_enabled),
                file_dir: logging
                    .file_dir
                    .map(PathBuf::from)
                    .unwrap_or(logging_defaults.file_dir),
                file_rotation: logging
                    .file_rotation
                    .map(|s| LogRotation::parse(&s))
                    .unwrap_or(logging_defaults.file_rotation),
                file_prefix: logging.file_prefix.unwrap_or(logging_defaults.file_prefix),
            },
        }
    }

    /// Apply `SYSSPAN_*` environment overrides
    ///
    /// Takes the variables as an iterator so tests can feed fake ones.
    pub fn apply_env(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "COLLECTOR_HOST" => self.collector_host = value,
                "COLLECTOR_PORT" => {
                    if let Ok(port) = value.parse() {
                        self.collector_port = port;
                    }
                }
                "SERVICE_NAME" => self.service_name = value,
                "HEALTH_PROBE_PORT" => {
                    if let Ok(port) = value.parse() {
                        self.health_probe_port = port;
                    }
                }
                "LOG_LEVEL" => self.logging.level = value,
                "DEMO" => self.demo_mode = matches!(value.as_str(), "1" | "true" | "yes"),
                _ => {}
            }
        }
    }

    /// Reject configurations the agent cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.collector_host.is_empty() {
            return Err(AgentError::Config("collector_host must not be empty".into()));
        }
        if self.collector_port == 0 {
            return Err(AgentError::Config("collector_port must not be zero".into()));
        }
        if self.service_name.is_empty() {
            return Err(AgentError::Config("service_name must not be empty".into()));
        }
        if self.exporter.queue_capacity == 0 {
            return Err(AgentError::Config(
                "exporter.queue_capacity must not be zero".into(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as a commented TOML document
    ///
    /// Used by `config --show` and `config --reset`.
    pub fn to_toml(&self) -> String {
        let excluded = self
            .excluded_users
            .iter()
            .map(|p| format!("'{p}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let rules_path = match &self.registry_rules_path {
            Some(p) => format!("registry_rules_path = '{}'", p.display()),
            None => "# registry_rules_path = '/etc/sysspan/registry_rules.toml'".to_string(),
        };

        format!(
            r#"# sysspan configuration
# Precedence: environment (SYSSPAN_*) > this file > defaults

# OTLP collector endpoint
collector_host = "{host}"
collector_port = {port}

# Resource attribute service.name
service_name = "{service}"

# Collector healthcheck extension, probed before start
health_probe_port = {health}

# OS idle/system pseudo-process
system_idle_pid = {idle}

# Events from matching users are dropped (regex)
excluded_users = [{excluded}]

# Registry-interest ruleset override (defaults to the embedded rules)
{rules_path}

# Generate synthetic host activity instead of waiting for producers
demo_mode = {demo}

[exporter]
queue_capacity = {queue}
flush_timeout_secs = {flush}
shutdown_timeout_secs = {shutdown}

[logging]
level = "{level}"
file_enabled = {file_enabled}
file_dir = '{file_dir}'
file_rotation = "{rotation}"
file_prefix = "{prefix}"
"#,
            host = self.collector_host,
            port = self.collector_port,
            service = self.service_name,
            health = self.health_probe_port,
            idle = self.system_idle_pid,
            excluded = excluded,
            rules_path = rules_path,
            demo = self.demo_mode,
            queue = self.exporter.queue_capacity,
            flush = self.exporter.flush_timeout_secs,
            shutdown = self.exporter.shutdown_timeout_secs,
            level = self.logging.level,
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display(),
            rotation = self.logging.file_rotation.as_str(),
            prefix = self.logging.file_prefix,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration as loaded from the TOML file; every field optional
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub collector_host: Option<String>,
    pub collector_port: Option<u16>,
    pub service_name: Option<String>,
    pub health_probe_port: Option<u16>,
    pub system_idle_pid: Option<i64>,
    pub excluded_users: Option<Vec<String>>,
    pub registry_rules_path: Option<String>,
    pub demo_mode: Option<bool>,
    pub exporter: Option<FileExporterConfig>,
    pub logging: Option<FileLogging>,
}

/// Exporter settings as loaded from the config file
#[derive(Debug, Deserialize, Default)]
pub struct FileExporterConfig {
    pub queue_capacity: Option<usize>,
    pub flush_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// Logging settings as loaded from the config file
#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}
