use serde::{Deserialize, Serialize};

/// Top-level daemon configuration, loaded from `kestrel.toml` and
/// overridable per-field from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Listen host for the coordinator protocol.
    pub host: String,
    /// Listen port for the coordinator protocol.
    pub port: u16,
    /// Max concurrent client connections.
    pub max_connections: usize,
    /// Per-connection input/output buffer capacity in bytes. Also the hard
    /// ceiling on a single frame: header plus payload must fit.
    pub buffer_size: usize,
    /// Max channel id (exclusive) multiplexed on one connection.
    pub max_channels: u32,
    /// Listen backlog handed to the kernel.
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    /// Graceful shutdown drain timeout in seconds.
    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,
    /// Prometheus metrics listen address. Empty disables the exporter.
    #[serde(default)]
    pub metrics_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Max concurrently in-progress global transactions.
    pub max_transactions: usize,
    /// How many terminal transactions are retained for late `GetStatus`
    /// and late-voter lookups before being pruned.
    pub retained_terminal: usize,
}

fn default_listen_backlog() -> u32 {
    128
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    30
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5431,
            max_connections: 1024,
            buffer_size: 64 * 1024,
            max_channels: 1024,
            listen_backlog: default_listen_backlog(),
            shutdown_drain_timeout_secs: default_shutdown_drain_timeout_secs(),
            metrics_addr: String::new(),
        }
    }
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            max_transactions: 4096,
            retained_terminal: 4096,
        }
    }
}

impl KestrelConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file is missing or does not parse.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                    KestrelConfig::default()
                }
            },
            Err(_) => {
                tracing::info!("Config file {} not found, using defaults", path);
                KestrelConfig::default()
            }
        }
    }

    /// The socket address string the server binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
