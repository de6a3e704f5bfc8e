//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Listener, dialer and per-connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. `None` binds to the discovered outbound address.
    pub bind_ip: Option<IpAddr>,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    pub max_message_len: usize,
    /// Consecutive accept failures tolerated before the listener is abandoned
    pub max_accept_errors: u32,
    pub read_buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: None,
            port: 4545,
            dial_timeout: Duration::from_secs(10),
            max_message_len: 100,
            max_accept_errors: 5,
            read_buffer_size: 4096,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Config {
    /// Configuration bound to an ephemeral loopback port
    pub fn loopback() -> Self {
        let mut config = Self::default();
        config.server.bind_ip = Some(IpAddr::from([127, 0, 0, 1]));
        config.server.port = 0;
        config
    }
}
