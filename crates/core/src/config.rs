//! TOML-based configuration for formcache.
//!
//! API credentials are stored as `_env` fields that reference environment
//! variable names. The actual secrets are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote forms API settings.
    pub api: ApiConfig,

    /// Local cache settings, including probe and sync policy.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// Remote forms API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST base URL, e.g. `https://example.com/wp-json/gf/v2`.
    pub base_url: String,

    /// Environment variable holding the API consumer key.
    pub consumer_key_env: String,

    /// Environment variable holding the API consumer secret.
    pub consumer_secret_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved consumer key (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub consumer_key: Option<String>,

    /// Resolved consumer secret (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub consumer_secret: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Local cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false, consumers skip the cache and go straight to the API.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// SQLite file location. `:memory:` selects an in-memory store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Age after which the cache is considered stale.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Per-ID probe policy.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Full-sync policy.
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_true() -> bool {
    true
}
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("formcache")
        .join("forms.db")
}
fn default_max_age() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            max_age_secs: default_max_age(),
            probe: ProbeConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl CacheConfig {
    /// An in-memory cache with default policy (useful for testing).
    pub fn in_memory() -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            ..Self::default()
        }
    }

    /// Validate cache settings without touching the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache.db_path".into(),
                detail: "must not be empty".into(),
            });
        }
        if self.probe.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.probe.max_attempts".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.probe.circuit_breaker_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.probe.circuit_breaker_threshold".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.probe.max_delay_ms < self.probe.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "cache.probe.max_delay_ms".into(),
                detail: "must not be smaller than base_delay_ms".into(),
            });
        }
        Ok(())
    }
}

/// Retry and circuit-breaker settings for per-ID probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Attempts per probe, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive failed probes that open the breaker within a batch.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// How many probe error strings `ProbeStats` retains.
    #[serde(default = "default_max_recorded_errors")]
    pub max_recorded_errors: usize,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    5000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_max_recorded_errors() -> usize {
    100
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            circuit_breaker_threshold: default_breaker_threshold(),
            max_recorded_errors: default_max_recorded_errors(),
        }
    }
}

/// Full-sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Ids probed past the highest known id to catch trailing inactive forms.
    #[serde(default = "default_trailing_window")]
    pub trailing_probe_window: u32,

    /// How far below the highest known id gaps are probed. Cached ids below
    /// the span are still refreshed.
    #[serde(default = "default_max_gap_span")]
    pub max_gap_span: u32,
}

fn default_trailing_window() -> u32 {
    5
}
fn default_max_gap_span() -> u32 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trailing_probe_window: default_trailing_window(),
            max_gap_span: default_max_gap_span(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading / validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `_env` fields to their values from the process environment.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.api.consumer_key = Some(resolve_required_env(
            &self.api.consumer_key_env,
            "api.consumer_key_env",
        )?);
        self.api.consumer_secret = Some(resolve_required_env(
            &self.api.consumer_secret_env,
            "api.consumer_secret_env",
        )?);
        Ok(())
    }

    /// Validate semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".into(),
                detail: "must not be empty".into(),
            });
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".into(),
                detail: "must start with http:// or https://".into(),
            });
        }
        if !base.starts_with("https://") {
            warn!(base_url = base, "API base URL is not using HTTPS");
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api.timeout_secs".into(),
                detail: "must be at least 1".into(),
            });
        }
        self.cache.validate()
    }

    /// Load, resolve and validate in one step.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn resolve_required_env(env_name: &str, field: &str) -> Result<String, ConfigError> {
    std::env::var(env_name).map_err(|_| ConfigError::EnvVarMissing {
        var: env_name.to_string(),
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "FORMS_KEY"
consumer_secret_env = "FORMS_SECRET"
timeout_secs = 10

[cache]
db_path = "/tmp/formcache/forms.db"
max_age_secs = 600

[cache.probe]
max_attempts = 4
circuit_breaker_threshold = 3

[cache.sync]
trailing_probe_window = 2
max_gap_span = 50

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.cache.max_age_secs, 600);
        assert_eq!(config.cache.probe.max_attempts, 4);
        assert_eq!(config.cache.probe.circuit_breaker_threshold, 3);
        assert_eq!(config.cache.probe.base_delay_ms, 250);
        assert_eq!(config.cache.sync.trailing_probe_window, 2);
        assert_eq!(config.cache.sync.max_gap_span, 50);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formcache.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.cache.db_path, PathBuf::from("/tmp/formcache/forms.db"));
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/formcache.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "K"
consumer_secret_env = "S"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_age_secs, 3600);
        assert_eq!(config.cache.probe.max_attempts, 3);
        assert_eq!(config.cache.probe.circuit_breaker_threshold, 5);
        assert_eq!(config.cache.sync.trailing_probe_window, 5);
        assert_eq!(config.cache.sync.max_gap_span, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.cache.db_path.ends_with("forms.db"));
    }

    #[test]
    fn test_validate_rejects_empty_db_path() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.cache.db_path = PathBuf::new();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "cache.db_path"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.api.base_url = "forms.example.com".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "api.base_url"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.cache.probe.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_FORMCACHE_KEY", "ck_123");
        std::env::set_var("TEST_FORMCACHE_SECRET", "cs_456");

        let toml_str = r#"
[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "TEST_FORMCACHE_KEY"
consumer_secret_env = "TEST_FORMCACHE_SECRET"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.api.consumer_key.as_deref(), Some("ck_123"));
        assert_eq!(config.api.consumer_secret.as_deref(), Some("cs_456"));

        std::env::remove_var("TEST_FORMCACHE_KEY");
        std::env::remove_var("TEST_FORMCACHE_SECRET");
    }

    #[test]
    fn test_resolve_env_vars_missing() {
        let toml_str = r#"
[api]
base_url = "https://forms.example.com/wp-json/gf/v2"
consumer_key_env = "TEST_FORMCACHE_UNSET_KEY"
consumer_secret_env = "TEST_FORMCACHE_UNSET_SECRET"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(result, Err(ConfigError::EnvVarMissing { .. })));
    }
}
