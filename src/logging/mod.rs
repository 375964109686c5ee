// Logging module - tracing subscriber setup
//
// Stdout logging is always on; file logging is opt-in and goes through a
// non-blocking rotating appender so slow disks never stall the agent. The
// returned guard must live for the duration of the process or buffered
// file output is lost.

use crate::config::{LogRotation, LoggingConfig};
use anyhow::Context as _;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all(&config.file_dir).with_context(|| {
        format!("cannot create log directory {}", config.file_dir.display())
    })?;

    let appender = match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => {
            tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Never => tracing_appender::rolling::never(
            &config.file_dir,
            format!("{}.log", config.file_prefix),
        ),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}
