// sysspan - host telemetry agent
//
// Consumes system activity events (process, file, registry, network, module)
// and re-emits them as a causally linked tree of OpenTelemetry spans plus
// structured log records, exported over OTLP/gRPC.
//
// Architecture:
// - Parser: decodes raw producer records into typed events
// - Filter: self-exclusion, user exclusion, registry-interest ruleset
// - Recorder: live process forest, actor sub-spans, span lifecycle
// - Exporter: dedicated-thread OTLP trace and log export
// - Demo producer: synthetic host activity for --demo runs

mod cli;
mod config;
mod demo;
mod error;
mod events;
mod export;
mod filter;
mod logging;
mod metrics;
mod parser;
mod recorder;
mod startup;

use clap::Parser as _;
use cli::{Cli, Commands};
use config::Config;
use export::otlp::{OtlpExporter, OtlpSettings};
use export::ExporterAdapter;
use filter::{AgentIdentity, FilterPipeline};
use metrics::DropCounters;
use recorder::SystemActivityRecorder;
use startup::exit;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    if let Some(Commands::Config { show, reset, path }) = cli.command {
        return cli::handle_config(show, reset, path);
    }

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return exit::CONFIG_ERROR;
        }
    };
    if cli.demo {
        config.demo_mode = true;
    }

    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot initialize logging: {e}");
            return exit::CONFIG_ERROR;
        }
    };

    startup::print_startup(&config);

    if !cli.no_health_probe && !startup::probe_collector(&config).await {
        return exit::COLLECTOR_UNREACHABLE;
    }

    // Agent self-identity, captured once and passed into the filter by value
    let identity = match AgentIdentity::current() {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("{e}");
            return exit::CONFIG_ERROR;
        }
    };
    tracing::info!(pid = identity.pid, binary = %identity.binary_path, "agent identity captured");

    let counters = Arc::new(DropCounters::new());

    let registry_rules = match filter::load_registry_rules(config.registry_rules_path.as_ref()) {
        Ok(rules) => rules,
        Err(e) => {
            tracing::error!("{e}");
            return exit::CONFIG_ERROR;
        }
    };
    let filter = match FilterPipeline::new(
        identity,
        config.system_idle_pid,
        &config.excluded_users,
        registry_rules,
        counters.clone(),
    ) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            tracing::error!("{e}");
            return exit::CONFIG_ERROR;
        }
    };

    let exporter: Arc<dyn ExporterAdapter> = match OtlpExporter::new(
        OtlpSettings {
            endpoint: config.collector_endpoint(),
            service_name: config.service_name.clone(),
            queue_capacity: config.exporter.queue_capacity,
        },
        counters.clone(),
    ) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("{e}");
            return exit::COLLECTOR_UNREACHABLE;
        }
    };

    let recorder = Arc::new(SystemActivityRecorder::new(exporter, counters.clone()));

    // Periodic forest/counter status line
    let stats_recorder = recorder.clone();
    let stats_counters = counters.clone();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // first tick is immediate
        loop {
            interval.tick().await;
            tracing::info!(tracked = stats_recorder.tracked_count(), "forest status");
            stats_counters.log_summary();
        }
    });

    // Producers: the demo generator in demo mode, external otherwise
    let (demo_shutdown_tx, demo_shutdown_rx) = oneshot::channel();
    let demo_task = if config.demo_mode {
        Some(tokio::spawn(demo::run_demo(
            recorder.clone(),
            filter.clone(),
            demo_shutdown_rx,
        )))
    } else {
        tracing::info!("no demo mode; waiting for external producers");
        None
    };

    tracing::info!("sysspan running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");

    let _ = demo_shutdown_tx.send(());
    if let Some(task) = demo_task {
        let _ = task.await;
    }
    stats_task.abort();

    // Recorder shutdown blocks on the exporter drain; keep it off the
    // async workers.
    let flush_deadline = config.exporter.flush_deadline();
    let shutdown_deadline = config.exporter.shutdown_deadline();
    let shutdown_recorder = recorder.clone();
    match tokio::task::spawn_blocking(move || {
        shutdown_recorder.shutdown(flush_deadline, shutdown_deadline)
    })
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("shutdown incomplete: {e}"),
        Err(e) => tracing::error!("shutdown task failed: {e}"),
    }

    counters.log_summary();
    exit::OK
}
