//! Intersection signal - adaptive signal timing from tracked detections
//!
//! Reads per-frame detections (JSONL), counts tripwire crossings per
//! approach, and drives a GREEN / AMBER / RED phase cycle whose green time
//! follows measured demand.
//!
//! Module structure:
//! - `domain/` - Core types (Detection, CountLine, SignalState, geometry)
//! - `io/` - External interfaces (detection source, egress)
//! - `services/` - Engine (Tripwire, Rates, Controller, PhaseMachine, Session)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use intersection_signal::infra::{Config, Metrics};
use intersection_signal::io::{open_detection_input, spawn_detection_reader};
use intersection_signal::services::{ControlParams, HeuristicController, Session};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Frames buffered between the detection reader and the session
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Adaptive intersection signal controller
#[derive(Parser, Debug)]
#[command(name = "intersection-signal", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Detection input (JSONL), "-" for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-frame detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "intersection-signal starting");

    let config_path = args.config.unwrap_or_else(Config::default_config_path);
    let config = Config::from_file(&config_path)
        .with_context(|| format!("configuration rejected: {}", config_path))?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        approaches = ?config.approaches(),
        lines = %config.count_lines().len(),
        rate_window_s = %config.rate_window_s(),
        min_green = %config.min_green(),
        max_green = %config.max_green(),
        green_extension = %config.green_extension(),
        clearance = %config.clearance(),
        fixed_red = %config.fixed_red(),
        fallback_phase = %config.fallback_phase(),
        "config_loaded"
    );

    if args.check {
        let controller = HeuristicController::new(ControlParams::from_config(&config));
        info!(
            thresholds = ?controller.params().thresholds,
            phase_change_penalty = %controller.params().phase_change_penalty,
            "config_check_passed"
        );
        return Ok(());
    }

    // Open input before anything runs so a bad path fails fast
    let input = open_detection_input(&args.input).await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Create frame channel (bounded for backpressure)
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    let reader = spawn_detection_reader(
        input,
        config.labels().clone(),
        frame_tx,
        metrics.clone(),
        shutdown_rx.clone(),
    );

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run session - consumes frames until the stream ends or shutdown
    let session = Session::new(&config, metrics.clone());
    let summary = session.run(frame_rx, shutdown_rx).await;

    reader.abort();
    metrics.report().log();

    match serde_json::to_string(&summary) {
        Ok(json) => info!(summary = %json, "session_summary"),
        Err(e) => tracing::error!(error = %e, "session_summary_serialize_failed"),
    }

    info!("intersection-signal shutdown complete");
    Ok(())
}
