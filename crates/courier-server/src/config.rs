//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (COURIER_*, nested keys joined with `__`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tenvis_courier_core::EngineConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages kept per conversation. Unbounded when unset.
    #[serde(default)]
    pub max_messages_per_conversation: Option<usize>,

    /// Maximum conversation id length.
    #[serde(default = "default_max_id_length")]
    pub max_conversation_id_length: usize,

    /// Maximum sender length.
    #[serde(default = "default_max_id_length")]
    pub max_sender_length: usize,

    /// Maximum message text length in bytes.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Conversations a single socket may join.
    #[serde(default = "default_max_rooms")]
    pub max_rooms_per_connection: usize,

    /// Broadcast buffer per conversation room.
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_id_length() -> usize {
    256
}

fn default_max_text_length() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_rooms() -> usize {
    100
}

fn default_room_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: None,
            max_conversation_id_length: default_max_id_length(),
            max_sender_length: default_max_id_length(),
            max_text_length: default_max_text_length(),
            max_rooms_per_connection: default_max_rooms(),
            room_capacity: default_room_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl LimitsConfig {
    /// Engine settings derived from these limits.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_messages_per_conversation: self.max_messages_per_conversation,
            max_conversation_id_length: self.max_conversation_id_length,
            max_sender_length: self.max_sender_length,
            max_text_length: self.max_text_length,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, layered under
    /// `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "courier.toml",
            "/etc/courier/courier.toml",
            "~/.config/courier/courier.toml",
        ];

        let mut builder = config::Config::builder();
        if let Some(path) = config_paths
            .iter()
            .map(|p| shellexpand::tilde(p).into_owned())
            .find(|p| Path::new(p).exists())
        {
            tracing::debug!("Loading config file {}", path);
            builder = builder.add_source(config::File::new(&path, config::FileFormat::Toml));
        }

        builder
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
