//! Configuration management for the dispatcher.

use crate::{CoreResult, Paths, RateLimitTable};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default delivery gateway base URL (can be overridden at compile time via
/// OUTBOXD_API_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("OUTBOXD_API_URL") {
    Some(url) => url,
    None => "https://gateway.outboxd.dev",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default maximum number of items admitted per dispatch cycle.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default interval between dispatch cycles in loop mode.
pub const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 30;

/// Default provider request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delivery gateway base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Optional bearer token for the delivery gateway.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Maximum items admitted per dispatch cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Whether cycles run the unthrottle and backfill steps.
    #[serde(default = "default_include_backfill")]
    pub include_backfill: bool,
    /// Seconds between cycles when running in loop mode.
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    /// Provider request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Per-integration rate limit policies.
    #[serde(default)]
    pub rate_limits: RateLimitTable,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_include_backfill() -> bool {
    true
}

fn default_dispatch_interval_secs() -> u64 {
    DEFAULT_DISPATCH_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            api_token: None,
            batch_size: default_batch_size(),
            include_backfill: default_include_backfill(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limits: RateLimitTable::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables can override the log level at runtime
    /// (OUTBOXD_LOG_LEVEL); everything else comes from the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("OUTBOXD_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Get the gateway base URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.include_backfill);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "batch_size": 10,
            "include_backfill": false
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.batch_size, 10);
        assert!(!config.include_backfill);
        // Missing fields fall back to defaults
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.dispatch_interval_secs, DEFAULT_DISPATCH_INTERVAL_SECS);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.batch_size = 25;
        config.api_token = Some("secret".to_string());

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.batch_size, 25);
        assert_eq!(loaded.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_config_rate_limits_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "rate_limits": {
                "default_policy": { "requests_per_second": 1, "max_concurrent": 1 },
                "integrations": {
                    "slack": { "requests_per_second": 2, "max_concurrent": 1 }
                }
            }
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.rate_limits.policy_for("slack").requests_per_second, 2);
        assert_eq!(config.rate_limits.policy_for("other").requests_per_second, 1);
    }

    #[test]
    fn test_config_api_base_url_parse() {
        let config = Config::default();
        let url = config.api_base_url().unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.api_base_url = "not a valid url".to_string();

        assert!(config.api_base_url().is_err());
    }

    #[test]
    fn test_default_constants() {
        assert!(!DEFAULT_LOG_LEVEL.is_empty());
        assert!(DEFAULT_API_BASE_URL.starts_with("https://"));
        assert_eq!(DEFAULT_BATCH_SIZE, 50);
    }
}
