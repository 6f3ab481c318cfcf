use std::sync::Arc;

use tracing::{error, info};

mod config;
mod error;
mod handlers;
mod latency;
mod metrics;
mod middleware;
mod saturation;
mod scrape;
mod server;
mod telemetry;
mod timeseries;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Runs query + probes + render for each scrape; owns the registry.
    pub scraper: scrape::Scraper,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // ── 1. Configuration & logging ───────────────────────────────
    let config = config::ExporterConfig::from_env()?;
    telemetry::init_tracing(&config.log)?;

    // ── 2. Registry & probe socket ───────────────────────────────
    let registry = Arc::new(metrics::exporter_registry()?);
    let pinger = latency::IcmpPinger::new()
        .map_err(|e| format!("cannot open ICMP socket (need CAP_NET_RAW or ping_group_range): {e}"))?;

    // ── 3. Build shared state ────────────────────────────────────
    let scraper = scrape::Scraper::new(&config, Arc::new(pinger), registry)?;
    info!(
        worst_case_ms = scraper.probe_worst_case().as_millis() as u64,
        concurrency = config.probe.concurrency,
        "probe batch bound"
    );
    let state = Arc::new(AppState { scraper });

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!(
        listen = %config.listen_addr,
        upstream = %config.upstream.base_url,
        targets = config.probe.targets.len(),
        threshold = config.saturation.threshold,
        "exporter listening; scrape /metrics"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
