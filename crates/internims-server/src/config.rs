//! Server configuration loading from file and environment variables.
//!
//! Everything is loaded once at startup and carried in [`crate::AppState`];
//! nothing is created lazily on first request.

use internims_types::{AuthScheme, SelfExclusion, DEFAULT_HISTORY_THRESHOLD_DAYS};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Announcement and sweep policy.
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "internims_auth=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// When the expiry sweeps run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// After every accepted announcement.
    #[default]
    OnAnnounce,
    /// From a background task every `sweep_interval_secs`.
    Scheduled,
}

/// Announcement handling policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Accept any `https` endpoint without sending the HEAD probe.
    #[serde(default)]
    pub skip_reachable_check: bool,

    /// Hard timeout on the reachability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// `User-Agent` sent with the reachability probe.
    #[serde(default = "default_probe_user_agent")]
    pub probe_user_agent: String,

    /// Whether the announcing site is listed in its own response.
    #[serde(default)]
    pub self_exclusion: SelfExclusion,

    /// Authentication schemes accepted for announcements.
    #[serde(default = "default_auth_methods")]
    pub auth_methods: Vec<AuthScheme>,

    #[serde(default)]
    pub sweep_mode: SweepMode,

    /// Period of the scheduled sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Days of silence before a history record is closed.
    #[serde(default = "default_history_threshold_days")]
    pub history_threshold_days: i64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "internims.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_probe_user_agent() -> String {
    "InterNIMS".to_string()
}

fn default_auth_methods() -> Vec<AuthScheme> {
    vec![AuthScheme::Signature, AuthScheme::Cram]
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_history_threshold_days() -> i64 {
    DEFAULT_HISTORY_THRESHOLD_DAYS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
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

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            skip_reachable_check: false,
            probe_timeout_secs: default_probe_timeout_secs(),
            probe_user_agent: default_probe_user_agent(),
            self_exclusion: SelfExclusion::default(),
            auth_methods: default_auth_methods(),
            sweep_mode: SweepMode::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            history_threshold_days: default_history_threshold_days(),
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

    /// Parsed, but the values cannot work together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects settings the registry cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let registry = &self.registry;
        if registry.auth_methods.is_empty() {
            return Err(ConfigError::Invalid(
                "registry.auth_methods must name at least one scheme".into(),
            ));
        }
        if registry.history_threshold_days < 1 {
            return Err(ConfigError::Invalid(format!(
                "registry.history_threshold_days must be at least 1, got {}",
                registry.history_threshold_days
            )));
        }
        if registry.probe_timeout_secs == 0 || registry.probe_timeout_secs > 9 {
            return Err(ConfigError::Invalid(format!(
                "registry.probe_timeout_secs must be between 1 and 9, got {}",
                registry.probe_timeout_secs
            )));
        }
        if registry.sweep_mode == SweepMode::Scheduled && registry.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.sweep_interval_secs must be positive for scheduled sweeps".into(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `INTERNIMS_HOST` overrides `server.host`
/// - `INTERNIMS_PORT` overrides `server.port`
/// - `INTERNIMS_DB_PATH` overrides `database.path`
/// - `INTERNIMS_LOG_LEVEL` overrides `logging.level`
/// - `INTERNIMS_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `INTERNIMS_SKIP_REACHABLE_CHECK` overrides `registry.skip_reachable_check`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration fails [`Config::validate`].
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

    // Environment variable overrides
    if let Ok(host) = std::env::var("INTERNIMS_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("INTERNIMS_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("INTERNIMS_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("INTERNIMS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("INTERNIMS_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(skip) = std::env::var("INTERNIMS_SKIP_REACHABLE_CHECK") {
        config.registry.skip_reachable_check = skip == "true" || skip == "1";
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "internims.db");
        assert!(!config.registry.skip_reachable_check);
        assert_eq!(config.registry.probe_timeout_secs, 3);
        assert_eq!(config.registry.self_exclusion, SelfExclusion::Exclude);
        assert_eq!(
            config.registry.auth_methods,
            [AuthScheme::Signature, AuthScheme::Cram]
        );
        assert_eq!(config.registry.sweep_mode, SweepMode::OnAnnounce);
        assert_eq!(config.registry.history_threshold_days, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn registry_section_parses() {
        let config: Config = toml::from_str(
            r#"
            [registry]
            skip_reachable_check = true
            self_exclusion = "include"
            auth_methods = ["cram"]
            sweep_mode = "scheduled"
            sweep_interval_secs = 15
            history_threshold_days = 3
            "#,
        )
        .unwrap();
        let registry = &config.registry;
        assert!(registry.skip_reachable_check);
        assert_eq!(registry.self_exclusion, SelfExclusion::Include);
        assert_eq!(registry.auth_methods, [AuthScheme::Cram]);
        assert_eq!(registry.sweep_mode, SweepMode::Scheduled);
        assert_eq!(registry.sweep_interval_secs, 15);
        assert_eq!(registry.history_threshold_days, 3);
        assert_eq!(registry.probe_user_agent, "InterNIMS");
    }

    #[test]
    fn unknown_enum_values_fail_to_parse() {
        assert!(toml::from_str::<Config>("[registry]\nself_exclusion = \"sometimes\"").is_err());
        assert!(toml::from_str::<Config>("[registry]\nauth_methods = [\"md5\"]").is_err());
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        let mut config = Config::default();
        config.registry.auth_methods.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.history_threshold_days = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.probe_timeout_secs = 30;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.sweep_mode = SweepMode::Scheduled;
        config.registry.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
