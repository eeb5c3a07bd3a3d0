//! Configuration management for the zone screening services.
//!
//! The service reads a single file at `~/.zonescan/config.json`. A missing
//! file is not an error: every field has a default.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZONESCAN_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ZONESCAN_PORT` → network.port
//! - `ZONESCAN_BIND_ADDRESS` → network.bind
//! - `ZONESCAN_LOG_LEVEL` → observability.log_level
//! - `ZONESCAN_SCANNER_URL` → scanner.base_url
//! - `ZONESCAN_HISTORY_URL` → history.base_url
//! - `ZONESCAN_DB_PATH` → storage.db_path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".zonescan"),
        |dirs| dirs.home_dir().join(".zonescan"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address (default `127.0.0.1`)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4470
}

// ============================================================================
// Scanner Configuration
// ============================================================================

/// External scanner endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Scanner site root; the homepage is fetched from here to obtain the XSRF cookie
    #[serde(default = "default_scanner_url")]
    pub base_url: String,

    /// Path of the form-encoded scan endpoint
    #[serde(default = "default_scan_path")]
    pub scan_path: String,

    /// User-Agent sent with every scanner request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_url: default_scanner_url(),
            scan_path: default_scan_path(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_scanner_url() -> String {
    "https://chartink.com".to_string()
}

fn default_scan_path() -> String {
    "/screener/process".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

// ============================================================================
// Price History Configuration
// ============================================================================

/// Daily price history feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Chart API root
    #[serde(default = "default_history_url")]
    pub base_url: String,

    /// Exchange suffix appended to scanner symbols (e.g. ".NS")
    #[serde(default = "default_symbol_suffix")]
    pub symbol_suffix: String,

    /// History range requested per symbol (e.g. "1mo")
    #[serde(default = "default_history_range")]
    pub range: String,

    /// Proactive request budget per minute
    #[serde(default = "default_history_rpm")]
    pub rate_limit_rpm: u32,

    /// How long fetched history stays in the warm-up cache
    #[serde(default = "default_history_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_history_url(),
            symbol_suffix: default_symbol_suffix(),
            range: default_history_range(),
            rate_limit_rpm: default_history_rpm(),
            cache_ttl_secs: default_history_cache_ttl(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_history_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_symbol_suffix() -> String {
    ".NS".to_string()
}

fn default_history_range() -> String {
    "1mo".to_string()
}

fn default_history_rpm() -> u32 {
    120
}

fn default_history_cache_ttl() -> u64 {
    900
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// In-memory cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of raw scanner results keyed by scan name
    #[serde(default = "default_scan_result_ttl")]
    pub scan_result_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            scan_result_ttl_secs: default_scan_result_ttl(),
        }
    }
}

fn default_scan_result_ttl() -> u64 {
    300
}

// ============================================================================
// Automation Configuration
// ============================================================================

/// Zone automation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Strategy whose candidates receive new order-block zones
    #[serde(default = "default_order_block_strategy")]
    pub order_block_strategy: String,

    /// Strategy whose candidates receive new fair-value-gap zones
    #[serde(default = "default_fair_value_gap_strategy")]
    pub fair_value_gap_strategy: String,

    /// Run automation on a cron schedule
    #[serde(default)]
    pub schedule_enabled: bool,

    /// Six-field cron expression (seconds first)
    #[serde(default = "default_schedule_cron")]
    pub schedule_cron: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            order_block_strategy: default_order_block_strategy(),
            fair_value_gap_strategy: default_fair_value_gap_strategy(),
            schedule_enabled: false,
            schedule_cron: default_schedule_cron(),
        }
    }
}

fn default_order_block_strategy() -> String {
    "order-block-automation".to_string()
}

fn default_fair_value_gap_strategy() -> String {
    "fair-value-gap-automation".to_string()
}

fn default_schedule_cron() -> String {
    "0 45 15 * * Mon-Fri".to_string() // after the cash session closes
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Zone and reference data storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    config_dir().join("zones.db")
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

    /// Additional module targets pinned to `warn`
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

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub automation: AutomationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("ZONESCAN_PORT") {
            if let Ok(p) = port.parse() {
                self.network.port = p;
            }
        }

        if let Ok(bind) = std::env::var("ZONESCAN_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Ok(level) = std::env::var("ZONESCAN_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(url) = std::env::var("ZONESCAN_SCANNER_URL") {
            self.scanner.base_url = url;
        }

        if let Ok(url) = std::env::var("ZONESCAN_HISTORY_URL") {
            self.history.base_url = url;
        }

        if let Ok(path) = std::env::var("ZONESCAN_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
    }

    /// Socket address string for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.port, 4470);
        assert_eq!(config.scanner.scan_path, "/screener/process");
        assert_eq!(config.cache.scan_result_ttl_secs, 300);
        assert!(!config.automation.schedule_enabled);
        assert_eq!(config.listen_addr(), "127.0.0.1:4470");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"scanner": {{"base_url": "http://localhost:9000"}}, "observability": {{"level": "debug"}}}}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.scanner.base_url, "http://localhost:9000");
        assert_eq!(config.scanner.timeout_secs, 30);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.history.symbol_suffix, ".NS");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
