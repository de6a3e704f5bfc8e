//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::IpAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load the effective configuration: the file's keys over environment
    /// variables over defaults
    pub fn load(path: &Path) -> Result<Config> {
        let base = Self::load_from_env()?;
        if !path.exists() {
            return Ok(base);
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::layer_file(base, &content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Apply the keys present in a TOML document on top of `base`
    pub fn layer_file(base: Config, content: &str) -> Result<Config> {
        let file: toml::Value = toml::from_str(content)?;
        let mut merged = toml::Value::try_from(&base)?;
        merge_values(&mut merged, file);
        let config: Config = merged.try_into()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_ip) = std::env::var("CHATTY_BIND_IP") {
            let ip = bind_ip
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid CHATTY_BIND_IP: {}", bind_ip))?;
            config.server.bind_ip = Some(ip);
        }

        if let Ok(port) = std::env::var("CHATTY_PORT") {
            config.server.port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid CHATTY_PORT: {}", port))?;
        }

        if let Ok(timeout) = std::env::var("CHATTY_DIAL_TIMEOUT") {
            config.server.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid CHATTY_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("CHATTY_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        if self.server.max_message_len == 0 {
            bail!("max_message_len must be greater than 0");
        }

        if self.server.max_accept_errors == 0 {
            bail!("max_accept_errors must be greater than 0");
        }

        if self.server.read_buffer_size < 64 {
            bail!("read_buffer_size must be at least 64 bytes");
        }

        if self.server.read_buffer_size > 1048576 {
            bail!("read_buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        log_level: Option<&str>,
    ) -> Result<()> {
        if let Some(bind_str) = bind {
            let ip = bind_str
                .parse::<IpAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_ip = Some(ip);
            tracing::info!("CLI override: bind address set to {}", ip);
        }

        if let Some(port) = port {
            self.server.port = port;
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
        }

        Ok(())
    }
}
