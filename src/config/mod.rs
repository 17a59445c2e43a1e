//! Configuration management
//!
//! Layered: built-in defaults, then `parley.toml` (or `$PARLEY_CONFIG`), then
//! `PARLEY__SECTION__KEY` environment variables, then `PORT`.

use crate::infrastructure::client::{BackoffPolicy, WakeupConfig};
use config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Per-connection outbound queue depth
    pub outbound_queue: usize,
    /// Seconds between stats log lines; 0 disables
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub relay_url: String,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub connect_timeout_ms: u64,
    pub wakeup_patterns: Vec<String>,
    pub wakeup_max_attempts: u32,
    pub wakeup_retry_delay_ms: u64,
    pub wakeup_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3001,
            },
            relay: RelayConfig {
                outbound_queue: 64,
                stats_interval_secs: 30,
            },
            client: ClientConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3001".to_string(),
            reconnect_base_delay_ms: 2000,
            reconnect_max_attempts: 5,
            connect_timeout_ms: 10_000,
            wakeup_patterns: vec!["onrender.com".to_string()],
            wakeup_max_attempts: 3,
            wakeup_retry_delay_ms: 2000,
            wakeup_timeout_ms: 10_000,
            settle_delay_ms: 2000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| "parley.toml".to_string());

        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("PARLEY")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("client.wakeup_patterns")
                    .try_parsing(true),
            )
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ClientConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.reconnect_max_attempts,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn wakeup(&self) -> WakeupConfig {
        WakeupConfig {
            patterns: self.wakeup_patterns.clone(),
            max_attempts: self.wakeup_max_attempts,
            retry_delay: Duration::from_millis(self.wakeup_retry_delay_ms),
            probe_timeout: Duration::from_millis(self.wakeup_timeout_ms),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
