//! Bootstrap configuration
//!
//! Resolution priority (highest first):
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing or unreadable config file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "REACH_CONFIG";
/// Environment variable overriding the database path
pub const ENV_DATABASE_PATH: &str = "REACH_DATABASE_PATH";
/// Environment variable overriding the geocoding API key
pub const ENV_GEOCODING_API_KEY: &str = "REACH_GEOCODING_API_KEY";
/// Environment variable overriding the log level
pub const ENV_LOG_LEVEL: &str = "REACH_LOG_LEVEL";

/// Configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Window (days) for selecting recently updated contacts
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    /// Upper bound for any single external lookup (DNS, geocoding)
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Maximum geocoding cache entries
    #[serde(default = "default_geocode_cache_capacity")]
    pub geocode_cache_capacity: usize,

    /// Geocoding cache entry lifetime; 0 disables expiry
    #[serde(default = "default_geocode_cache_ttl_secs")]
    pub geocode_cache_ttl_secs: u64,

    /// Region used to parse phone numbers without a leading `+`
    #[serde(default = "default_phone_region")]
    pub default_phone_region: String,
}

/// Geocoding provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// API key; geocoding is disabled when absent
    #[serde(default)]
    pub api_key: Option<String>,

    /// Endpoint override (defaults to the Google Geocoding API)
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("reach.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_days_back() -> u32 {
    7
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

fn default_geocode_cache_capacity() -> usize {
    1024
}

fn default_geocode_cache_ttl_secs() -> u64 {
    86_400
}

fn default_phone_region() -> String {
    "US".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            geocode_cache_capacity: default_geocode_cache_capacity(),
            geocode_cache_ttl_secs: default_geocode_cache_ttl_secs(),
            default_phone_region: default_phone_region(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            sync: SyncConfig::default(),
            geocoding: GeocodingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration following the resolution priority
    ///
    /// `cli_config` is an explicit config file path; `cli_database` an explicit
    /// database path. Both win over every other source.
    pub fn load(cli_config: Option<&Path>, cli_database: Option<&Path>) -> Result<Self> {
        let explicit = cli_config
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));

        let mut config = match explicit {
            // An explicitly named file must exist and parse
            Some(path) => Self::read_file(&path)?,
            None => match find_config_file() {
                Some(path) => match Self::read_file(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring unreadable config {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                None => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();

        if let Some(path) = cli_database {
            config.database_path = path.to_path_buf();
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `REACH_*` environment overrides in place
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATABASE_PATH) {
            if !path.trim().is_empty() {
                self.database_path = PathBuf::from(path);
            }
        }
        if let Ok(key) = std::env::var(ENV_GEOCODING_API_KEY) {
            if !key.trim().is_empty() {
                self.geocoding.api_key = Some(key);
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
    }
}

/// Locate the user or system config file, if any
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("reach").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/reach/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("reach"))
        .unwrap_or_else(|| PathBuf::from("./reach_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            database_path = "/tmp/reach.db"

            [sync]
            days_back = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/reach.db"));
        assert_eq!(config.sync.days_back, 3);
        assert_eq!(config.sync.lookup_timeout_ms, 3000);
        assert_eq!(config.sync.default_phone_region, "US");
        assert_eq!(config.logging.level, "info");
        assert!(config.geocoding.api_key.is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = TomlConfig::from_toml_str("database_path = [");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
