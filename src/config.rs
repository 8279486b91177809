//! Observer configuration loading from file and environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observer: ObserverConfig,

    #[serde(default)]
    pub horizon: HorizonConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub cursor_store: CursorStoreConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which ledger backend feeds the observer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Horizon,
    Rpc,
}

/// Observer state machine timings. Durations are in seconds unless suffixed.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserverConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_silence_check_interval")]
    pub silence_check_interval: u64,

    #[serde(default = "default_silence_timeout")]
    pub silence_timeout: u64,

    /// Silence restarts before giving up. Zero retries forever.
    #[serde(default = "default_silence_timeout_retries")]
    pub silence_timeout_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_stream_backoff_time: u64,

    #[serde(default = "default_max_backoff")]
    pub max_stream_backoff_time: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_event_backoff_time: u64,

    #[serde(default = "default_max_backoff")]
    pub max_event_backoff_time: u64,

    #[serde(default = "default_initial_database_backoff")]
    pub initial_database_backoff_time: u64,

    #[serde(default = "default_max_database_backoff")]
    pub max_database_backoff_time: u64,

    #[serde(default = "default_status_check_interval_ms")]
    pub status_check_interval_ms: u64,
}

impl ObserverConfig {
    pub fn silence_check_interval(&self) -> Duration {
        Duration::from_secs(self.silence_check_interval)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout)
    }

    pub fn status_check_interval(&self) -> Duration {
        Duration::from_millis(self.status_check_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HorizonConfig {
    #[serde(default = "default_horizon_url")]
    pub url: String,

    /// How far behind the network tip a stored cursor may resume from.
    #[serde(default = "default_page_window")]
    pub page_window: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

/// Downstream platform API receiving transaction status notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_url")]
    pub url: String,

    #[serde(default = "default_funds_received_message")]
    pub funds_received_message: String,

    #[serde(default = "default_funds_sent_message")]
    pub funds_sent_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorStoreConfig {
    #[serde(default = "default_cursor_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    /// Anchor distribution accounts, always watched.
    #[serde(default)]
    pub distribution_accounts: Vec<String>,

    /// Seconds a transient account may go unobserved before eviction.
    #[serde(default = "default_max_idle_time")]
    pub max_idle_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "stellar_payment_observer=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_silence_check_interval() -> u64 {
    5
}

fn default_silence_timeout() -> u64 {
    90
}

fn default_silence_timeout_retries() -> u32 {
    2
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    300
}

fn default_initial_database_backoff() -> u64 {
    1
}

fn default_max_database_backoff() -> u64 {
    20
}

fn default_status_check_interval_ms() -> u64 {
    1000
}

fn default_horizon_url() -> String {
    "https://horizon-testnet.stellar.org".to_string()
}

fn default_page_window() -> u32 {
    200
}

fn default_rpc_url() -> String {
    "https://soroban-testnet.stellar.org".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_page_limit() -> u32 {
    100
}

fn default_platform_url() -> String {
    "http://localhost:8085".to_string()
}

fn default_funds_received_message() -> String {
    "Funds received from user".to_string()
}

fn default_funds_sent_message() -> String {
    "Funds sent to user".to_string()
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("data/cursors.json")
}

fn default_max_idle_time() -> u64 {
    7 * 24 * 3600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            silence_check_interval: default_silence_check_interval(),
            silence_timeout: default_silence_timeout(),
            silence_timeout_retries: default_silence_timeout_retries(),
            initial_stream_backoff_time: default_initial_backoff(),
            max_stream_backoff_time: default_max_backoff(),
            initial_event_backoff_time: default_initial_backoff(),
            max_event_backoff_time: default_max_backoff(),
            initial_database_backoff_time: default_initial_database_backoff(),
            max_database_backoff_time: default_max_database_backoff(),
            status_check_interval_ms: default_status_check_interval_ms(),
        }
    }
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            url: default_horizon_url(),
            page_window: default_page_window(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            poll_interval_ms: default_poll_interval_ms(),
            page_limit: default_page_limit(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: default_platform_url(),
            funds_received_message: default_funds_received_message(),
            funds_sent_message: default_funds_sent_message(),
        }
    }
}

impl Default for CursorStoreConfig {
    fn default() -> Self {
        Self {
            path: default_cursor_path(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            distribution_accounts: Vec::new(),
            max_idle_time: default_max_idle_time(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration is inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Check the settings the observer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let observer = &self.observer;
        if observer.silence_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "observer.silence_check_interval must be positive".into(),
            ));
        }
        if observer.silence_timeout == 0 {
            return Err(ConfigError::Invalid(
                "observer.silence_timeout must be positive".into(),
            ));
        }
        if observer.silence_timeout < observer.silence_check_interval {
            return Err(ConfigError::Invalid(
                "observer.silence_timeout must not be shorter than silence_check_interval".into(),
            ));
        }
        if observer.status_check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "observer.status_check_interval_ms must be positive".into(),
            ));
        }

        for (name, initial, max) in [
            (
                "stream",
                observer.initial_stream_backoff_time,
                observer.max_stream_backoff_time,
            ),
            (
                "event",
                observer.initial_event_backoff_time,
                observer.max_event_backoff_time,
            ),
            (
                "database",
                observer.initial_database_backoff_time,
                observer.max_database_backoff_time,
            ),
        ] {
            if initial == 0 {
                return Err(ConfigError::Invalid(format!(
                    "observer.initial_{name}_backoff_time must be positive"
                )));
            }
            if max < initial {
                return Err(ConfigError::Invalid(format!(
                    "observer.max_{name}_backoff_time must not be below its initial value"
                )));
            }
        }

        let backend_url = match observer.backend {
            Backend::Horizon => &self.horizon.url,
            Backend::Rpc => &self.rpc.url,
        };
        if backend_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "url of the {:?} backend is empty",
                observer.backend
            )));
        }
        if self.platform.url.trim().is_empty() {
            return Err(ConfigError::Invalid("platform.url is empty".into()));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `OBSERVER_HORIZON_URL` overrides `horizon.url`
/// - `OBSERVER_RPC_URL` overrides `rpc.url`
/// - `OBSERVER_PLATFORM_URL` overrides `platform.url`
/// - `OBSERVER_CURSOR_PATH` overrides `cursor_store.path`
/// - `OBSERVER_LOG_LEVEL` overrides `logging.level`
/// - `OBSERVER_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or if the resulting
/// configuration fails [`Config::validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply environment overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("OBSERVER_HORIZON_URL") {
        config.horizon.url = url;
    }
    if let Some(url) = lookup("OBSERVER_RPC_URL") {
        config.rpc.url = url;
    }
    if let Some(url) = lookup("OBSERVER_PLATFORM_URL") {
        config.platform.url = url;
    }
    if let Some(path) = lookup("OBSERVER_CURSOR_PATH") {
        config.cursor_store.path = PathBuf::from(path);
    }
    if let Some(level) = lookup("OBSERVER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("OBSERVER_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.observer.backend, Backend::Horizon);
        assert_eq!(config.observer.silence_timeout, 90);
        assert_eq!(config.observer.max_database_backoff_time, 20);
        assert_eq!(config.horizon.page_window, 200);
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [observer]
            backend = "rpc"
            silence_timeout_retries = 0

            [accounts]
            distribution_accounts = ["GBBD47IF6LWK7P7MDEVSCWR7DPUWV3NY3DTQEVFL4NAT4AQH3ZLLFLA5"]
            "#,
        )
        .unwrap();
        assert_eq!(config.observer.backend, Backend::Rpc);
        assert_eq!(config.observer.silence_timeout_retries, 0);
        assert_eq!(config.observer.silence_timeout, 90);
        assert_eq!(config.accounts.distribution_accounts.len(), 1);
        assert_eq!(config.rpc.page_limit, 100);
    }

    #[test]
    fn test_validation_rejects_bad_backoff() {
        let mut config = Config::default();
        config.observer.max_stream_backoff_time = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.observer.silence_timeout = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.observer.backend = Backend::Rpc;
        config.rpc.url = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OBSERVER_HORIZON_URL", "http://horizon.local"),
            ("OBSERVER_CURSOR_PATH", "/tmp/cursors.json"),
            ("OBSERVER_LOG_JSON", "1"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.horizon.url, "http://horizon.local");
        assert_eq!(config.cursor_store.path, PathBuf::from("/tmp/cursors.json"));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Some("/nonexistent/observer.toml")).unwrap();
        assert_eq!(config.observer.silence_check_interval, 5);
    }
}
