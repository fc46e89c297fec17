//! Configuration for ppe-relay.

use crate::error::{Error, Result};
use crate::record::{Keys, KIND_LONG_FORM, KIND_TEXT_NOTE};
use crate::upstream::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the operator's hex secret key.
pub const OPERATOR_KEY_VAR: &str = "OPERATOR_PRIVATE_KEY";

/// Environment variable holding the bot's hex secret key.
pub const BOT_KEY_VAR: &str = "BOT_PRIVATE_KEY";

/// Upstream relays queried for payments and used to publish bot replies.
pub const DEFAULT_UPSTREAM_RELAYS: &[&str] = &[
    "wss://relay.snort.social",
    "wss://nos.lol",
    "wss://nostr.mom",
    "wss://nostr.wine",
    "wss://relay.damus.io",
    "wss://relay.nostr.band",
    "wss://purplepag.es",
    "wss://relay.nostr.land",
    "wss://relay.primal.net",
];

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Root directory for relay data.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Address to bind the websocket listener to.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Listening port (0 for auto-select).
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database file; defaults to `db/db` under `root_dir`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Upstream relay configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Admission configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Read-path configuration.
    #[serde(default)]
    pub queries: QueryConfig,

    /// Command bot configuration.
    #[serde(default)]
    pub bot: BotConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Upstream relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Relay URLs.
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,

    /// Deadline for a multi-relay payment fetch, in seconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Deadline for the bot's "already answered" lookup, in seconds.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Deadline for opening one websocket, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Deadline for a relay to acknowledge a publish, in seconds.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,

    /// First redial delay after a relay drops the live query subscription,
    /// in milliseconds. Doubles per failed attempt.
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,

    /// Longest redial delay, in seconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

/// Admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Kinds the relay accepts; empty accepts every kind.
    #[serde(default = "default_allowed_kinds")]
    pub allowed_kinds: Vec<u16>,

    /// Hold a per-author lock from the payment check until the save.
    #[serde(default = "default_true")]
    pub serialize_per_payer: bool,

    /// Maximum number of authors with a live lock entry.
    #[serde(default = "default_cache_capacity")]
    pub payer_lock_capacity: usize,

    /// When non-empty, only zap receipts signed by these keys count.
    #[serde(default)]
    pub trusted_zap_issuers: Vec<String>,

    /// Refuse records embedding `data:image/` or `data:video/` URIs.
    #[serde(default = "default_true")]
    pub reject_base64_media: bool,
}

/// Read-path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Most stored records returned per filter; also the default `limit`.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Refuse filters that constrain nothing.
    #[serde(default = "default_true")]
    pub reject_empty_filters: bool,

    /// Refuse filters with too many tag and kind constraints.
    #[serde(default = "default_true")]
    pub reject_complex_filters: bool,
}

/// Command bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Run the command bot.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of answered query ids remembered in process.
    #[serde(default = "default_cache_capacity")]
    pub answered_cache_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            bind: default_bind(),
            port: default_port(),
            database: None,
            upstream: UpstreamConfig::default(),
            admission: AdmissionConfig::default(),
            queries: QueryConfig::default(),
            bot: BotConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            query_timeout_secs: default_query_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            reconnect_base_ms: default_reconnect_base(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            allowed_kinds: default_allowed_kinds(),
            serialize_per_payer: true,
            payer_lock_capacity: default_cache_capacity(),
            trusted_zap_issuers: Vec::new(),
            reject_base64_media: true,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            reject_empty_filters: true,
            reject_complex_filters: true,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            answered_cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "ppe-relay")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ppe-relay"))
}

const fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    3456
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_relays() -> Vec<String> {
    DEFAULT_UPSTREAM_RELAYS.iter().map(ToString::to_string).collect()
}

const fn default_query_timeout() -> u64 {
    10
}

const fn default_lookup_timeout() -> u64 {
    5
}

const fn default_connect_timeout() -> u64 {
    5
}

const fn default_ack_timeout() -> u64 {
    5
}

const fn default_reconnect_base() -> u64 {
    1000
}

const fn default_reconnect_max() -> u64 {
    30
}

const fn default_max_limit() -> usize {
    500
}

fn default_allowed_kinds() -> Vec<u16> {
    vec![KIND_TEXT_NOTE, KIND_LONG_FORM]
}

const fn default_true() -> bool {
    true
}

const fn default_cache_capacity() -> usize {
    10_000
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the SQLite database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.root_dir.join("db").join("db"))
    }
}

impl UpstreamConfig {
    /// Payment fetch deadline.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Answered lookup deadline.
    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Websocket connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Publish acknowledgement deadline.
    #[must_use]
    pub const fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Redial delays for the live query subscription.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_secs(self.reconnect_max_secs),
        }
    }
}

/// Signing identities, supplied out of band.
#[derive(Debug, Clone)]
pub struct Secrets {
    /// Identity payments are addressed to and queries mention.
    pub operator: Keys,
    /// Identity that signs bot replies.
    pub bot: Keys,
}

impl Secrets {
    /// Read both keys from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either key is absent or malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read both keys through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either key is absent or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let load = |name: &str| -> Result<Keys> {
            let value = lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("environment variable {name} not set")))?;
            Keys::from_hex(value.trim()).map_err(|e| Error::Config(format!("{name}: {e}")))
        };
        Ok(Self {
            operator: load(OPERATOR_KEY_VAR)?,
            bot: load(BOT_KEY_VAR)?,
        })
    }
}
