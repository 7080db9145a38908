//! Link Layerizer entry point.
//!
//! Loads the configuration, wires the engine to in-process collaborators and
//! runs the daemon loop until SIGINT.
//!
//! The networks, system manager and subscription registry are the in-memory
//! ones from `mlo_orch_common::memory`. No transport is attached, so nothing
//! outside the process can deliver connection events or requests; a host
//! that has one feeds the daemon through [`DaemonHandle`] instead.
//!
//! [`DaemonHandle`]: mlo_linklayerizer::daemon::DaemonHandle

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mlo_linklayerizer::audit::{self, AuditCategory, AuditOutcome, AuditRecord};
use mlo_linklayerizer::audit_log;
use mlo_linklayerizer::config::{LayerizerConfig, DEFAULT_CONFIG_PATH};
use mlo_linklayerizer::daemon::{self, LayerizerDaemon, LayerizerDaemonConfig};
use mlo_linklayerizer::layerizer::{LayerizerContext, LinkLayerizer, LinkLayerizerConfig};
use mlo_orch_common::memory::{MemoryNetworkRegistry, MemorySubscriptionSink, MemorySystemManager};
use tracing::{error, info, warn};

/// Multi-layer link projection daemon
#[derive(Parser, Debug)]
#[command(name = "linklayerizer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Component id, overrides [engine].id
    #[arg(long)]
    id: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides [logging].level
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    /// Heartbeat interval in milliseconds, overrides [daemon].heartbeat_interval_ms
    #[arg(long)]
    heartbeat_interval: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<LayerizerConfig> {
    let mut config = LayerizerConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    if let Some(id) = &args.id {
        config.engine.id = id.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json {
        config.logging.json = true;
    }
    if let Some(ms) = args.heartbeat_interval {
        config.daemon.heartbeat_interval_ms = ms;
    }

    config.validate().context("validating configuration")?;
    Ok(config)
}

async fn run(config: LayerizerConfig) {
    let daemon_config = LayerizerDaemonConfig::from(&config);
    let (handle, inbox) = daemon::channel(daemon_config.queue_depth);

    let subscriptions = Arc::new(MemorySubscriptionSink::new());
    let registry = MemoryNetworkRegistry::new()
        .with_sink(handle.subscribed_sink(Arc::clone(&subscriptions), config.engine.id.as_str()));
    let context = LayerizerContext::new(
        Arc::new(MemorySystemManager::new()),
        Arc::new(registry),
        subscriptions,
    );

    let engine = LinkLayerizer::new(
        LinkLayerizerConfig::new(config.engine.id.as_str())
            .with_default_flow_priority(config.engine.default_flow_priority),
        context,
    );
    let daemon = LayerizerDaemon::with_inbox(daemon_config, engine, inbox);

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    };

    let engine = daemon.run(shutdown).await;
    info!(
        stats = %serde_json::to_string(engine.stats()).unwrap_or_default(),
        "engine stopped"
    );
    drop(handle);
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("linklayerizer: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = audit::init_logging(&config.logging.level, config.logging.json) {
        eprintln!("linklayerizer: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting linklayerizer id={}", config.engine.id);
    audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "linklayerizer", "start")
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&config.engine.id)
        .with_details(serde_json::json!({ "config": args.config })));

    run(config).await;

    info!("linklayerizer shutdown complete");
    ExitCode::SUCCESS
}
