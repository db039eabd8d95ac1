//! Daemon configuration.
//!
//! Loaded from a TOML file; every setting except the broker alias has a
//! default, so a minimal config is just `[broker]` with `alias = "..."`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default STOMP port for plaintext connections.
const DEFAULT_STOMP_PORT: u16 = 61613;

/// Default STOMP port when TLS transport is selected.
const DEFAULT_STOMP_SSL_PORT: u16 = 61614;

/// Default interval between broker alias re-resolutions (30 minutes).
const DEFAULT_CHECK_INTERVAL_MINS: u64 = 30;

/// Default message expiry (24 hours).
const DEFAULT_TTL_HOURS: u64 = 24;

/// Default capacity of the loader-to-publisher channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 20_000;

/// Default maximum entries per loaded batch.
const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Default base directory for the per-stream disk queues.
const DEFAULT_MESSAGE_DIR: &str = "/var/lib/msg-relay";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Base directory holding the per-stream disk queues.
    ///
    /// The relay consumes `<message_dir>/monitoring`; producers on the same
    /// host append to it.
    #[serde(default = "default_message_dir")]
    pub message_dir: PathBuf,

    pub broker: BrokerSettings,

    #[serde(default)]
    pub publish: PublishSettings,

    #[serde(default)]
    pub destinations: DestinationSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Broker endpoint and transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSettings {
    /// DNS alias of the broker cluster. May resolve to several hosts; each
    /// becomes an endpoint in the publisher's round-robin pool.
    pub alias: String,

    /// Use the TLS transport (and `ssl_port`) instead of plaintext.
    #[serde(default)]
    pub use_ssl: bool,

    #[serde(default = "default_stomp_port")]
    pub port: u16,

    #[serde(default = "default_stomp_ssl_port")]
    pub ssl_port: u16,

    /// Minutes between alias re-resolutions while the pool is healthy.
    #[serde(default = "default_check_interval_mins")]
    pub check_interval_mins: u64,

    /// Login credentials, sent only when present.
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// TLS settings, carried to the transport when `use_ssl` is set.
    #[serde(default)]
    pub ssl: SslSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// TLS material for the broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslSettings {
    /// Verify the broker's certificate chain.
    #[serde(default = "default_true")]
    pub verify_peer: bool,

    pub root_ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for SslSettings {
    fn default() -> Self {
        SslSettings {
            verify_peer: true,
            root_ca: None,
            client_cert: None,
            client_key: None,
        }
    }
}

/// How outgoing payloads are stamped before delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishSettings {
    /// Value injected as `endpnt` into every payload. Defaults to the local
    /// hostname when absent.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Also inject the local FQDN as `fqdn`.
    #[serde(default)]
    pub publish_fqdn: bool,

    /// Publish to topics rather than queues.
    #[serde(default = "default_true")]
    pub use_topics: bool,
}

impl Default for PublishSettings {
    fn default() -> Self {
        PublishSettings {
            endpoint: None,
            publish_fqdn: false,
            use_topics: true,
        }
    }
}

/// Destination names for the four message kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationSettings {
    #[serde(default = "default_started")]
    pub started: String,

    #[serde(default = "default_completed")]
    pub completed: String,

    #[serde(default = "default_state")]
    pub state: String,

    #[serde(default = "default_optimizer")]
    pub optimizer: String,

    /// Message expiry in hours, applied to every destination.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for DestinationSettings {
    fn default() -> Self {
        DestinationSettings {
            started: default_started(),
            completed: default_completed(),
            state: default_state(),
            optimizer: default_optimizer(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

/// Pipeline sizing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSettings {
    /// Capacity of the loader-to-publisher channel; entries past this are
    /// shed and re-read from disk on a later scan.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum entries per batch handed to the publisher.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

impl RelayConfig {
    /// Loads and parses the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The disk queue directory the relay consumes.
    pub fn monitoring_dir(&self) -> PathBuf {
        self.message_dir.join("monitoring")
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.broker.check_interval_mins * 60)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.destinations.ttl_hours * 3600)
    }

    /// Broker port for the configured transport.
    pub fn broker_port(&self) -> u16 {
        if self.broker.use_ssl {
            self.broker.ssl_port
        } else {
            self.broker.port
        }
    }
}

fn default_message_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MESSAGE_DIR)
}

fn default_stomp_port() -> u16 {
    DEFAULT_STOMP_PORT
}

fn default_stomp_ssl_port() -> u16 {
    DEFAULT_STOMP_SSL_PORT
}

fn default_check_interval_mins() -> u64 {
    DEFAULT_CHECK_INTERVAL_MINS
}

fn default_ttl_hours() -> u64 {
    DEFAULT_TTL_HOURS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_started() -> String {
    "transfer.fts_monitoring_start".to_owned()
}

fn default_completed() -> String {
    "transfer.fts_monitoring_complete".to_owned()
}

fn default_state() -> String {
    "transfer.fts_monitoring_state".to_owned()
}

fn default_optimizer() -> String {
    "transfer.fts_monitoring_queue_state".to_owned()
}

fn default_true() -> bool {
    true
}
