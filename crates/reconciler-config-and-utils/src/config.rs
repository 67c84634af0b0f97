//! Configuration management for the session reconciler.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend URL (can be overridden at compile time via SESSION_BACKEND_URL env var).
pub const DEFAULT_BACKEND_URL: &str = match option_env!("SESSION_BACKEND_URL") {
    Some(url) => url,
    None => "http://localhost:3210",
};

/// Storage slot holding the persisted session credential.
pub const DEFAULT_CREDENTIAL_KEY: &str = "sessionIdForConvex";

/// Where unauthenticated hosts are sent when authentication is required.
pub const DEFAULT_LANDING_PATH: &str = "/";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Bounds and delays for the two retry loops of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total access-token requests allowed per reconciliation cycle.
    pub max_token_attempts: u32,
    /// Delay before re-requesting an access token.
    pub token_retry_delay_ms: u64,
    /// Re-checks allowed while the provider has not yet reported authenticated.
    pub max_propagation_retries: u32,
    /// Delay between propagation re-checks.
    pub propagation_retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_token_attempts: 3,
            token_retry_delay_ms: 1000,
            max_propagation_retries: 5,
            propagation_retry_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn token_retry_delay(&self) -> Duration {
        Duration::from_millis(self.token_retry_delay_ms)
    }

    pub fn propagation_retry_delay(&self) -> Duration {
        Duration::from_millis(self.propagation_retry_delay_ms)
    }
}

/// Main reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL of the backend session service.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Optional API key sent with every backend request.
    #[serde(default)]
    pub backend_api_key: Option<String>,
    /// Durable storage key of the session credential.
    #[serde(default = "default_credential_key")]
    pub credential_key: String,
    /// Landing surface for redirects of unauthenticated hosts.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Whether hosts must redirect when no valid session exists.
    #[serde(default)]
    pub redirect_if_unauthenticated: bool,
    /// Retry loop bounds.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_credential_key() -> String {
    DEFAULT_CREDENTIAL_KEY.to_string()
}

fn default_landing_path() -> String {
    DEFAULT_LANDING_PATH.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_api_key: None,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            redirect_if_unauthenticated: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file under `paths`, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.credential_key.trim().is_empty() {
            return Err(CoreError::Config("credential_key must not be empty".into()));
        }
        if self.retry.max_token_attempts == 0 {
            return Err(CoreError::Config(
                "retry.max_token_attempts must be at least 1".into(),
            ));
        }
        self.backend_url()?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("SESSION_RECONCILER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("SESSION_RECONCILER_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url.trim().to_string();
            }
        }
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> CoreResult<Url> {
        Url::parse(&self.backend_url).map_err(CoreError::from)
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
        assert_eq!(config.credential_key, "sessionIdForConvex");
        assert_eq!(config.landing_path, "/");
        assert!(!config.redirect_if_unauthenticated);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.max_token_attempts, 3);
        assert_eq!(retry.token_retry_delay(), Duration::from_secs(1));
        assert_eq!(retry.max_propagation_retries, 5);
        assert_eq!(retry.propagation_retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "redirect_if_unauthenticated": true,
            "retry": { "max_token_attempts": 5 }
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.redirect_if_unauthenticated);
        assert_eq!(config.retry.max_token_attempts, 5);
        assert_eq!(config.retry.max_propagation_retries, 5);
        assert_eq!(config.credential_key, DEFAULT_CREDENTIAL_KEY);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.landing_path = "/welcome".to_string();
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.landing_path, "/welcome");
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.credential_key, DEFAULT_CREDENTIAL_KEY);
    }

    #[test]
    fn test_validate_rejects_zero_token_attempts() {
        let mut config = Config::default();
        config.retry.max_token_attempts = 0;
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.backend_url = "not a valid url".to_string();
        assert!(config.backend_url().is_err());
        assert!(config.validate().is_err());
    }
}
