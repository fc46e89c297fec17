//! Command-line interface definition.

use clap::Parser;
use ppe_relay::RelayConfig;
use std::path::PathBuf;

/// Pay-per-event Nostr relay: zap the operator, then post.
#[derive(Parser, Debug)]
#[command(name = "ppe-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory for relay data.
    #[arg(long, env = "PPE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Listening port (0 for auto-select).
    #[arg(long, short, env = "PPE_PORT")]
    pub port: Option<u16>,

    /// Upstream relay URL; repeat to replace the default list.
    #[arg(long = "upstream", short, env = "PPE_UPSTREAM", value_delimiter = ',')]
    pub upstream: Vec<String>,

    /// Record kind to accept; repeat to replace the default list.
    #[arg(long = "allowed-kind", env = "PPE_ALLOWED_KINDS", value_delimiter = ',')]
    pub allowed_kinds: Vec<u16>,

    /// Deadline in seconds for collecting payments from upstream relays.
    #[arg(long, env = "PPE_QUERY_TIMEOUT")]
    pub query_timeout: Option<u64>,

    /// Do not serialize admission per author.
    #[arg(long, env = "PPE_NO_PAYER_SERIALIZATION")]
    pub no_payer_serialization: bool,

    /// Do not run the balance command bot.
    #[arg(long, env = "PPE_NO_BOT")]
    pub no_bot: bool,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PPE_JSON_LOGS")]
    pub json_logs: bool,

    /// Path to configuration file.
    #[arg(long, short, env = "PPE_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Convert CLI arguments into a `RelayConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<RelayConfig> {
        let mut config = if let Some(ref path) = self.config {
            RelayConfig::from_file(path)?
        } else {
            RelayConfig::default()
        };

        if let Some(data_dir) = self.data_dir {
            config.root_dir = data_dir;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.upstream.is_empty() {
            config.upstream.relays = self.upstream;
        }
        if !self.allowed_kinds.is_empty() {
            config.admission.allowed_kinds = self.allowed_kinds;
        }
        if let Some(secs) = self.query_timeout {
            config.upstream.query_timeout_secs = secs;
        }
        if self.no_payer_serialization {
            config.admission.serialize_per_payer = false;
        }
        if self.no_bot {
            config.bot.enabled = false;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
