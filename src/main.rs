// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - schema:     Channel, message and job record types
// - util:       Time and logging helpers
// - metrics:    Global counters + periodic reporter
// - source:     Message source trait and relay adapter
// - catalog:    Channel resolution
// - replay:     Bounded historical backfill
// - live:       Live subscription tail
// - extraction: Extraction service wrapper and normalization
// - validator:  "Is this a posting" decision
// - sinks:      Sink trait, fanout and sink adapters
// - pipeline:   Coordinator and state machine
//
mod catalog;
mod config;
mod extraction;
mod live;
mod metrics;
mod pipeline;
mod replay;
mod schema;
mod sinks;
mod source;
mod util;
mod validator;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use rustls::crypto::{CryptoProvider, ring};

use config::Config;
use pipeline::{PipelineCoordinator, PipelineOutcome};
use schema::ReplayWindow;
use sinks::DefaultSinkStore;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration and logging
// - Build the message source, extractor and sink store
// - Run the pipeline until interrupt or disconnect
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls >= 0.23 requires an explicit CryptoProvider before the
    // first TLS handshake (live WebSocket).
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        bail!("failed to install rustls CryptoProvider");
    }

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load(&path)?;
    util::init_logging(config.debug.as_ref())?;
    log::info!("Loaded configuration from {}", path);

    metrics::spawn_reporter(config.metrics_interval_secs());

    let source = source::build_source(&config.source)?;
    let extractor = extraction::build_extractor(&config.extraction)?;

    // Window is fixed at process start; a restart re-scans today
    let window = ReplayWindow::starting_today(Utc::now());

    let mut coordinator =
        PipelineCoordinator::new(&config, source, extractor, Arc::new(DefaultSinkStore));

    let outcome = coordinator.run(window, shutdown_signal()).await;
    log::info!(
        "Pipeline {:?} after {:?}: {:?}",
        coordinator.state(),
        coordinator.history(),
        coordinator.stats()
    );
    log::info!("[METRICS] {}", metrics::METRICS.summary());

    match outcome {
        PipelineOutcome::Interrupted => Ok(()),
        PipelineOutcome::NoSinks => bail!("no sinks available"),
        PipelineOutcome::Disconnected => bail!("live transport disconnected"),
    }
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for interrupt: {}", e);
        std::future::pending::<()>().await;
    }
}
