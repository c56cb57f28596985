//! Thin binary wiring `uptime-core`'s `UptimeService` to an axum HTTP
//! server: configuration, tracing, metrics, and process lifecycle only.
//! No probing, scheduling, or aggregation logic lives here.

mod auth;
mod error_response;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use tracing::info;
use uptime_core::config::CoreConfig;
use uptime_core::store::memory::{InMemoryNodeStore, InMemorySampleStore};
use uptime_core::UptimeService;

#[tokio::main]
async fn main() -> Result<()> {
    let config = CoreConfig::from_file("config/uptime-api").unwrap_or_else(|_| CoreConfig::default());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.env_filter_default.clone())),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!(
        "Starting uptime-api v{} — probe scheduler, state machine, telemetry aggregator",
        env!("CARGO_PKG_VERSION")
    );

    initialize_metrics();
    let metrics_addr = config.server.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "failed to start Prometheus metrics server");
        }
    });

    let node_store = Arc::new(InMemoryNodeStore::new());
    let sample_store = Arc::new(InMemorySampleStore::new());
    let service = UptimeService::new(node_store, sample_store, &config);

    info!("booting scheduler from store");
    service
        .boot()
        .await
        .context("failed to boot scheduler from node store")?;

    let app = routes::router(service.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(listen_addr = %config.server.listen_addr, "uptime-api listening");

    let shutdown_service = service.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received; draining in-flight probes");
            shutdown_service.shutdown().await;
        })
        .await
        .context("API server error")?;

    Ok(())
}

fn initialize_metrics() {
    describe_counter!("probe_executed_total", "Total probes executed by the scheduler");
    describe_counter!("probe_succeeded_total", "Total probes that succeeded");
    describe_counter!("probe_failed_total", "Total probes that failed");
    describe_counter!("state_transition_total", "Total node status transitions");
    describe_counter!(
        "scheduler_ticks_skipped_total",
        "Total ticks skipped due to an in-flight probe for the same node"
    );
    describe_gauge!("scheduler_active_timers", "Current number of registered node timers");
    describe_gauge!("nodes_status_active", "Current number of nodes with status active");
    describe_gauge!("nodes_status_warning", "Current number of nodes with status warning");
    describe_gauge!("nodes_status_down", "Current number of nodes with status down");
    describe_gauge!("nodes_status_paused", "Current number of nodes with status paused");
}

async fn start_metrics_server(addr: std::net::SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(metrics_addr = %addr, "starting Prometheus metrics server");
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    Ok(())
}
