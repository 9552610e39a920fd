//! Configuration management for dipscan services.
//!
//! The service reads a single configuration file at `~/.dipscan/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (DIPSCAN_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `DIPSCAN_LOG_LEVEL` → observability.log_level
//! - `DIPSCAN_LOG_FORMAT` → observability.log_format
//! - `DIPSCAN_BIND_ADDRESS` → server.host
//! - `DIPSCAN_PORT` → server.port
//! - `DIPSCAN_QUOTE_ENDPOINT` → quotes.endpoint
//! - `DIPSCAN_QUOTE_SOURCE` → quotes.source

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".dipscan"),
        |dirs| dirs.home_dir().join(".dipscan"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the dipscan service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// HTTP boundary configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Quote source, cache and market clock configuration
    #[serde(default)]
    pub quotes: QuotesConfig,

    /// Persisted user settings location
    #[serde(default)]
    pub settings: SettingsStoreConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// Runs before the subscriber is installed and must not log.
    pub fn load() -> Result<Self> {
        Self::load_or_default(&config_path())
    }

    /// Load configuration from `path`, or defaults if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// The lookup function is injected so tests do not touch the process env.
    /// A value that does not parse for its field is an error.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("DIPSCAN_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("DIPSCAN_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(bind) = lookup("DIPSCAN_BIND_ADDRESS") {
            self.server.host = bind;
        }
        if let Some(port) = lookup("DIPSCAN_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid DIPSCAN_PORT: {}", port))?;
        }
        if let Some(endpoint) = lookup("DIPSCAN_QUOTE_ENDPOINT") {
            self.quotes.endpoint = endpoint;
        }
        if let Some(source) = lookup("DIPSCAN_QUOTE_SOURCE") {
            self.quotes.source = source;
        }
        Ok(())
    }

    /// Resolved path of the settings store file.
    pub fn settings_path(&self) -> PathBuf {
        match &self.settings.path {
            Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => config_dir().join("settings.json"),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server configuration for the request boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Quotes Configuration
// ============================================================================

/// Quote source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesConfig {
    /// Quote source: "sina" (live) or "mock" (synthetic offline data)
    #[serde(default = "default_source")]
    pub source: String,

    /// Endpoint prefix; the comma-joined codes are appended verbatim.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Referer header sent with every quote request
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Instrument codes requested on every fetch, in display order
    #[serde(default = "default_codes")]
    pub codes: Vec<String>,

    /// Network timeout for a single fetch
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a filtered batch stays fresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Market local time offset from UTC, in hours (Shanghai/Shenzhen: +8)
    #[serde(default = "default_market_utc_offset_hours")]
    pub market_utc_offset_hours: i32,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            endpoint: default_endpoint(),
            referer: default_referer(),
            codes: default_codes(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            market_utc_offset_hours: default_market_utc_offset_hours(),
        }
    }
}

// ============================================================================
// Settings Store Configuration
// ============================================================================

/// Where persisted user settings live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsStoreConfig {
    /// Path of the JSON settings file; `~` is expanded.
    /// Default: `~/.dipscan/settings.json`
    #[serde(default)]
    pub path: Option<String>,
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4440
}
fn default_source() -> String {
    "sina".into()
}
fn default_endpoint() -> String {
    "https://hq.sinajs.cn/list=".into()
}
fn default_referer() -> String {
    "https://finance.sina.com.cn".into()
}
fn default_codes() -> Vec<String> {
    vec!["sh000001".into(), "sz399001".into(), "sz399006".into()]
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}
fn default_market_utc_offset_hours() -> i32 {
    8
}
