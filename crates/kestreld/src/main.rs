use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use kestrel_common::config::KestrelConfig;
use kestrel_coordinator::{Coordinator, CoordinatorConfig};
use kestrel_server::{Dispatcher, KestrelServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "kestreld", about = "KestrelDTM — distributed transaction coordinator daemon")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "kestrel.toml")]
    config: String,

    /// Listen host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Max concurrent client connections (overrides config).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Per-connection buffer capacity in bytes (overrides config).
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Max channels multiplexed on one connection (overrides config).
    #[arg(long)]
    max_channels: Option<u32>,

    /// Prometheus metrics listen address (overrides config).
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

/// Interval at which coordinator gauges are pushed to the exporter.
const GAUGE_EXPORT_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_default_config {
        let default_config = KestrelConfig::default();
        let toml_str = toml::to_string_pretty(&default_config)
            .unwrap_or_else(|e| format!("# failed to serialize default config: {}", e));
        println!("{}", toml_str);
        return ExitCode::SUCCESS;
    }

    kestrel_observability::init_tracing();
    tracing::info!("Starting KestrelDTM...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let server = match runtime.block_on(startup(&cli)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("startup failed: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let drain_timeout = Duration::from_secs(server.drain_timeout_secs.max(1));
    match runtime.block_on(server.inner.serve_with_shutdown(
        async {
            let reason = wait_for_shutdown_signal().await;
            tracing::info!("{} — initiating graceful shutdown", reason);
        },
        drain_timeout,
    )) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal runtime error: {}", e);
            ExitCode::from(2)
        }
    }
}

struct BoundDaemon {
    inner: KestrelServer<Dispatcher>,
    drain_timeout_secs: u64,
}

/// Everything that can fail before the daemon is serving: config load,
/// metrics exporter, bind/listen.
async fn startup(cli: &Cli) -> Result<BoundDaemon> {
    let mut config = KestrelConfig::load(&cli.config);

    // CLI overrides
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(max_connections) = cli.max_connections {
        config.server.max_connections = max_connections;
    }
    if let Some(buffer_size) = cli.buffer_size {
        config.server.buffer_size = buffer_size;
    }
    if let Some(max_channels) = cli.max_channels {
        config.server.max_channels = max_channels;
    }
    if let Some(ref metrics_addr) = cli.metrics_addr {
        config.server.metrics_addr = metrics_addr.clone();
    }

    tracing::info!("Config: {:?}", config);

    if !config.server.metrics_addr.is_empty() {
        if let Err(e) = kestrel_observability::init_metrics(&config.server.metrics_addr) {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig {
        max_transactions: config.coordinator.max_transactions,
        retained_terminal: config.coordinator.retained_terminal,
    }));

    // Push coordinator gauges to the exporter on a fixed cadence.
    let gauge_source = coordinator.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(GAUGE_EXPORT_INTERVAL);
        loop {
            tick.tick().await;
            let stats = gauge_source.stats();
            kestrel_observability::record_coordinator_gauges(
                stats.in_progress,
                stats.parked_waiters,
            );
            kestrel_observability::record_txn_outcome_totals(stats.committed, stats.aborted);
        }
    });

    let max_payload = config
        .server
        .buffer_size
        .saturating_sub(kestrel_proto::HEADER_LEN);
    let dispatcher = Arc::new(Dispatcher::new(coordinator, max_payload));

    let server_config = ServerConfig {
        listen_addr: config.listen_addr(),
        max_connections: config.server.max_connections,
        buffer_size: config.server.buffer_size,
        max_channels: config.server.max_channels,
        listen_backlog: config.server.listen_backlog,
    };
    let server = KestrelServer::bind(server_config, dispatcher).await?;

    tracing::info!(
        "KestrelDTM ready on {} (max_connections={}, max_channels={})",
        server.local_addr()?,
        config.server.max_connections,
        config.server.max_channels,
    );

    Ok(BoundDaemon {
        inner: server,
        drain_timeout_secs: config.server.shutdown_drain_timeout_secs,
    })
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, returning a description of which
/// signal fired.
async fn wait_for_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .unwrap_or_else(|e| panic!("Failed to register SIGTERM handler: {}", e));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT (Ctrl+C) received",
            _ = sigterm.recv() => "SIGTERM received",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT (Ctrl+C) received"
    }
}
