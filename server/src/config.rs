use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Relay chat server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Relay team-chat server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Maximum concurrent WebSocket connections per user
    #[arg(long, env = "RELAY_MAX_CONNECTIONS_PER_USER", default_value = "5")]
    pub max_connections_per_user: usize,

    /// Seconds to wait for a single outbound frame to flush before the
    /// connection is treated as dead
    #[arg(long, env = "RELAY_SEND_TIMEOUT_SECS", default_value = "5")]
    pub send_timeout_secs: u64,

    /// Interval in seconds between server-initiated WebSocket pings
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong after a ping before closing the connection
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            max_connections_per_user: 5,
            send_timeout_secs: 5,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Chat Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# ---- Fanout tuning ----

# Maximum concurrent WebSocket connections per user. A connection past the
# cap is refused with close code 4005; existing connections are untouched.
# max_connections_per_user = 5

# Seconds to wait for a single outbound frame to flush before the receiving
# connection is treated as dead and torn down
# send_timeout_secs = 5

# Server-initiated WebSocket ping cadence and pong deadline
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
