//! # Screen Configuration
//!
//! Loads the front-end configuration: which Moonraker instances to talk to,
//! how hard to retry, and how much temperature history to keep.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [main]
//! default_printer = "voron"
//! temp_store_size = 1200
//!
//! [connection]
//! max_retries = 4
//! retry_interval_secs = 10
//!
//! [[printers]]
//! name = "voron"
//! moonraker_host = "192.168.1.20"
//! moonraker_port = 7125
//! moonraker_api_key = "0123456789abcdef"
//!
//! [[printers]]
//! name = "ender"
//! moonraker_host = "ender.local"
//! moonraker_port = 443
//! moonraker_path = "/moonraker"
//! ```
//!
//! Ports 443 and 7130 switch both REST and WebSocket to TLS.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the screen, the connection policy and the printers.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub printers: Vec<PrinterEntry>,
}

/// Screen-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MainConfig {
    #[serde(default)]
    pub default_printer: Option<String>,
    #[serde(default = "default_temp_store_size")]
    pub temp_store_size: usize,
    #[serde(default = "default_temp_store_interval_secs")]
    pub temp_store_interval_secs: u64,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            default_printer: None,
            temp_store_size: default_temp_store_size(),
            temp_store_interval_secs: default_temp_store_interval_secs(),
        }
    }
}

impl MainConfig {
    pub fn temp_store_interval(&self) -> Duration {
        Duration::from_secs(self.temp_store_interval_secs.max(1))
    }
}

/// Retry and timeout policy for the Moonraker connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
            rest_timeout_ms: default_rest_timeout_ms(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ConnectionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// One Moonraker instance the screen can be pointed at.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PrinterEntry {
    pub name: String,
    #[serde(default = "default_moonraker_host")]
    pub moonraker_host: String,
    #[serde(default = "default_moonraker_port")]
    pub moonraker_port: u16,
    #[serde(default)]
    pub moonraker_api_key: Option<String>,
    #[serde(default)]
    pub moonraker_path: Option<String>,
}

impl Default for PrinterEntry {
    fn default() -> Self {
        Self {
            name: "Printer".to_string(),
            moonraker_host: default_moonraker_host(),
            moonraker_port: default_moonraker_port(),
            moonraker_api_key: None,
            moonraker_path: None,
        }
    }
}

impl PrinterEntry {
    pub fn is_secure(&self) -> bool {
        matches!(self.moonraker_port, 443 | 7130)
    }

    /// Route prefix normalized to either "" or "/segment".
    fn route_prefix(&self) -> String {
        match self.moonraker_path.as_deref().map(|p| p.trim_matches('/')) {
            Some(p) if !p.is_empty() => format!("/{}", p),
            _ => String::new(),
        }
    }

    pub fn http_endpoint(&self) -> String {
        let scheme = if self.is_secure() { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.moonraker_host, self.moonraker_port, self.route_prefix())
    }

    pub fn ws_endpoint(&self) -> String {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.moonraker_host, self.moonraker_port, self.route_prefix())
    }
}

impl Config {
    /// Pick a printer by name, then `default_printer`, then the first entry.
    /// With no `[[printers]]` at all a local Moonraker is assumed.
    pub fn printer(&self, name: Option<&str>) -> Option<PrinterEntry> {
        if self.printers.is_empty() {
            return match name {
                None => Some(PrinterEntry::default()),
                Some(_) => None,
            };
        }
        let wanted = name.or(self.main.default_printer.as_deref());
        match wanted {
            Some(wanted) => self.printers.iter().find(|p| p.name == wanted).cloned(),
            None => self.printers.first().cloned(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for printer in &self.printers {
            if printer.name.trim().is_empty() {
                return Err(ConfigError::Invalid("Printer name cannot be empty".to_string()));
            }
            if !seen.insert(printer.name.as_str()) {
                return Err(ConfigError::Invalid(format!("Duplicate printer name '{}'", printer.name)));
            }
            if printer.moonraker_port == 0 {
                return Err(ConfigError::Invalid(format!("Printer '{}' has port 0", printer.name)));
            }
        }
        if let Some(default) = &self.main.default_printer {
            if !self.printers.is_empty() && !seen.contains(default.as_str()) {
                return Err(ConfigError::Invalid(format!("default_printer '{}' is not configured", default)));
            }
        }
        if self.main.temp_store_size == 0 {
            return Err(ConfigError::Invalid("temp_store_size must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_temp_store_size() -> usize { 1200 }
fn default_temp_store_interval_secs() -> u64 { 1 }
fn default_max_retries() -> u32 { 4 }
fn default_retry_interval_secs() -> u64 { 10 }
fn default_rest_timeout_ms() -> u64 { 4000 }
fn default_handshake_timeout_secs() -> u64 { 10 }
fn default_moonraker_host() -> String { "127.0.0.1".to_string() }
fn default_moonraker_port() -> u16 { 7125 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
