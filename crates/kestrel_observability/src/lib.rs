//! Observability setup: structured logging and Prometheus metrics.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on the given address.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one global-transaction decision.
/// `action` should be one of: "started", "committed", "aborted".
pub fn record_txn_decision(action: &str) {
    metrics::counter!("kestrel_txn_total", "action" => action.to_string()).increment(1);
}

/// Record one issued snapshot.
pub fn record_snapshot_issued() {
    metrics::counter!("kestrel_snapshots_total").increment(1);
}

pub fn record_active_connections(count: usize) {
    metrics::gauge!("kestrel_active_connections").set(count as f64);
}

/// Record coordinator table gauges from a stats snapshot.
pub fn record_coordinator_gauges(in_progress: usize, parked_waiters: usize) {
    metrics::gauge!("kestrel_txn_in_progress").set(in_progress as f64);
    metrics::gauge!("kestrel_parked_waiters").set(parked_waiters as f64);
}

/// Record decision totals from a stats snapshot.
pub fn record_txn_outcome_totals(committed: u64, aborted: u64) {
    metrics::gauge!("kestrel_txn_committed_total").set(committed as f64);
    metrics::gauge!("kestrel_txn_aborted_total").set(aborted as f64);
}

/// Record a protocol violation that killed a connection.
pub fn record_protocol_violation() {
    metrics::counter!("kestrel_protocol_violations_total").increment(1);
}
