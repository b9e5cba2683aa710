//! Configuration: TOML file, `PDI_*` environment overrides, and the
//! constants the session layer runs on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Login endpoint, relative to the backend base URL.
pub const LOGIN_PATH: &str = "/auth/login";

/// Refresh endpoint, relative to the backend base URL.
pub const REFRESH_PATH: &str = "/auth/refreshtoken";

/// Marker header stamped on a request replayed after a token refresh.
pub const RETRY_AUTH_HEADER: &str = "retry-auth";

/// Correlation header stamped on every logical request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Unique name of the periodic background refresh task.
pub const REFRESH_WORK_NAME: &str = "token_refresh_work";

/// Hard cap on 401 -> refresh -> retry attempts per logical request.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Default connect timeout for backend calls.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default overall request timeout for backend calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "backend.base_url") is overridden.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Timing of the background refresh machinery.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// Period of the background refresh task.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Window at the end of each period in which the task may fire.
    #[serde(default = "default_flex_secs")]
    pub flex_secs: u64,
    /// Base delay of the linear retry backoff.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    /// Retries per background run after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Poll period of the foreground token monitor.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Cap on 401 -> refresh -> retry attempts per logical request.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            flex_secs: default_flex_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
            max_retries: default_max_retries(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn flex(&self) -> Duration {
        Duration::from_secs(self.flex_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
const fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT.as_secs()
}
const fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}
const fn default_interval_secs() -> u64 {
    14 * 60
}
const fn default_flex_secs() -> u64 {
    4 * 60
}
const fn default_retry_backoff_secs() -> u64 {
    10
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_monitor_interval_secs() -> u64 {
    5 * 60
}
const fn default_max_auth_attempts() -> u32 {
    MAX_AUTH_ATTEMPTS
}
fn default_storage_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pdi-auth")
        .join("credentials.json")
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading, env overrides, validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply `PDI_*` environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides_from(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save the file-level configuration (without env overrides) as TOML.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from an environment lookup function.
    ///
    /// Every supported setting has a `PDI_*` variable; when present the value
    /// replaces the file/default value and the key is recorded in
    /// `env_overrides`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = lookup($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    } else {
                        tracing::warn!(env = $env, value = %val, "Ignoring unparsable override");
                    }
                }
            };
        }

        // -- Backend --
        env_str!("backend.base_url", "PDI_BACKEND_BASE_URL", self.backend.base_url);
        env_parse!(
            "backend.connect_timeout_secs",
            "PDI_BACKEND_CONNECT_TIMEOUT_SECS",
            self.backend.connect_timeout_secs
        );
        env_parse!(
            "backend.request_timeout_secs",
            "PDI_BACKEND_REQUEST_TIMEOUT_SECS",
            self.backend.request_timeout_secs
        );

        // -- Refresh --
        env_parse!("refresh.interval_secs", "PDI_REFRESH_INTERVAL_SECS", self.refresh.interval_secs);
        env_parse!("refresh.flex_secs", "PDI_REFRESH_FLEX_SECS", self.refresh.flex_secs);
        env_parse!(
            "refresh.retry_backoff_secs",
            "PDI_REFRESH_RETRY_BACKOFF_SECS",
            self.refresh.retry_backoff_secs
        );
        env_parse!("refresh.max_retries", "PDI_REFRESH_MAX_RETRIES", self.refresh.max_retries);
        env_parse!(
            "refresh.monitor_interval_secs",
            "PDI_REFRESH_MONITOR_INTERVAL_SECS",
            self.refresh.monitor_interval_secs
        );
        env_parse!(
            "refresh.max_auth_attempts",
            "PDI_REFRESH_MAX_AUTH_ATTEMPTS",
            self.refresh.max_auth_attempts
        );

        // -- Storage --
        env_parse!("storage.backend", "PDI_STORAGE_BACKEND", self.storage.backend);
        if let Some(val) = lookup("PDI_STORAGE_PATH") {
            self.storage.path = PathBuf::from(val);
            ov.record("storage.path", "PDI_STORAGE_PATH");
        }

        // -- Logging --
        env_str!("logging.level", "PDI_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "PDI_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }

    /// Reject settings the session layer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.backend.base_url)
            .map_err(|e| Error::Config(format!("backend.base_url '{}': {e}", self.backend.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "backend.base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.refresh.interval_secs == 0 || self.refresh.monitor_interval_secs == 0 {
            return Err(Error::Config("refresh intervals must be non-zero".into()));
        }
        if self.refresh.flex_secs > self.refresh.interval_secs {
            return Err(Error::Config(format!(
                "refresh.flex_secs ({}) exceeds refresh.interval_secs ({})",
                self.refresh.flex_secs, self.refresh.interval_secs
            )));
        }
        if self.refresh.max_auth_attempts == 0 {
            return Err(Error::Config("refresh.max_auth_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.refresh.interval(), Duration::from_secs(840));
        assert_eq!(config.refresh.flex(), Duration::from_secs(240));
        assert_eq!(config.refresh.monitor_interval(), Duration::from_secs(300));
        assert_eq!(config.refresh.max_auth_attempts, 3);
        assert_eq!(config.backend.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            base_url = "https://pdi.example.com/api"

            [refresh]
            interval_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "https://pdi.example.com/api");
        assert_eq!(config.refresh.interval_secs, 600);
        assert_eq!(config.refresh.flex_secs, 240);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_overrides_recorded() {
        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[
            ("PDI_BACKEND_BASE_URL", "https://override.example.com"),
            ("PDI_REFRESH_MAX_RETRIES", "5"),
            ("PDI_STORAGE_BACKEND", "memory"),
            ("PDI_LOG_JSON", "yes"),
        ]));

        assert_eq!(config.backend.base_url, "https://override.example.com");
        assert_eq!(config.refresh.max_retries, 5);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.logging.json);
        assert!(config.env_overrides.is_overridden("backend.base_url"));
        assert_eq!(
            config.env_overrides.env_var_for("storage.backend"),
            Some("PDI_STORAGE_BACKEND")
        );
        assert!(!config.env_overrides.is_overridden("refresh.interval_secs"));
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides_from(env(&[("PDI_REFRESH_INTERVAL_SECS", "soon")]));
        assert_eq!(config.refresh.interval_secs, 840);
        assert!(!config.env_overrides.is_overridden("refresh.interval_secs"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.backend.base_url = "ftp://example.com".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.refresh.flex_secs = config.refresh.interval_secs + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.refresh.monitor_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdi-auth.toml");

        let mut config = Config::default();
        config.backend.base_url = "https://pdi.example.com".into();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.backend.base_url, "https://pdi.example.com");
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("Keyring".parse::<StorageBackend>().unwrap(), StorageBackend::Keyring);
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
