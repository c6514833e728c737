//! Configuration loading from file and environment variables.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokenauth_db::{
    default_reader_max_open, ConnectionSettings, DatabaseSettings, PoolSettings, ReaderSettings,
    WriterSettings,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Bulk seed settings.
    #[serde(default)]
    pub seed: SeedConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Open only the reader; seeding is refused.
    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub writer: WriterConfig,
}

/// Reader service limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    /// Precompiled lookup statements kept ready.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Wait for a released statement before compiling a fallback.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Physical connection cap. Unset means twice `pool_capacity`.
    #[serde(default)]
    pub max_open: Option<u32>,

    #[serde(default = "default_reader_max_idle")]
    pub max_idle: u32,

    /// Connection lifetime in seconds. 0 means unlimited.
    #[serde(default = "default_reader_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    #[serde(default)]
    pub busy_timeout_ms: u64,

    /// Answer the `no_db` identifier without touching the store.
    #[serde(default)]
    pub synthetic_bypass: bool,
}

/// Writer service limits.
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_writer_max_open")]
    pub max_open: u32,

    #[serde(default = "default_writer_max_idle")]
    pub max_idle: u32,

    /// Connection lifetime in seconds. 0 means unlimited.
    #[serde(default)]
    pub max_lifetime_secs: u64,

    #[serde(default = "default_writer_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Bulk seed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    /// Records synthesized by a seed without an explicit count.
    #[serde(default = "default_seed_count")]
    pub count: usize,

    /// Seed once after the services open.
    #[serde(default)]
    pub on_start: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tokenauth_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    "tokenauth.db".to_string()
}

fn default_pool_capacity() -> usize {
    tokenauth_db::DEFAULT_POOL_CAPACITY
}

fn default_acquire_timeout_ms() -> u64 {
    tokenauth_db::DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64
}

fn default_reader_max_idle() -> u32 {
    4
}

fn default_reader_max_lifetime_secs() -> u64 {
    30 * 60
}

fn default_writer_max_open() -> u32 {
    4
}

fn default_writer_max_idle() -> u32 {
    1
}

fn default_writer_busy_timeout_ms() -> u64 {
    5_000
}

fn default_seed_count() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            read_only: false,
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_open: None,
            max_idle: default_reader_max_idle(),
            max_lifetime_secs: default_reader_max_lifetime_secs(),
            busy_timeout_ms: 0,
            synthetic_bypass: false,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_open: default_writer_max_open(),
            max_idle: default_writer_max_idle(),
            max_lifetime_secs: 0,
            busy_timeout_ms: default_writer_busy_timeout_ms(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            count: default_seed_count(),
            on_start: false,
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

fn lifetime(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl DatabaseConfig {
    /// Converts the file representation into service settings.
    pub fn to_settings(&self) -> DatabaseSettings {
        let reader = ReaderSettings {
            connection: ConnectionSettings {
                max_open: self
                    .reader
                    .max_open
                    .unwrap_or_else(|| default_reader_max_open(self.reader.pool_capacity)),
                max_idle: self.reader.max_idle,
                max_lifetime: lifetime(self.reader.max_lifetime_secs),
                busy_timeout_ms: self.reader.busy_timeout_ms,
                ..ConnectionSettings::default()
            },
            pool: PoolSettings {
                capacity: self.reader.pool_capacity,
                acquire_timeout: Duration::from_millis(self.reader.acquire_timeout_ms),
            },
            synthetic_bypass: self.reader.synthetic_bypass,
        };
        let writer = WriterSettings {
            connection: ConnectionSettings {
                max_open: self.writer.max_open,
                max_idle: self.writer.max_idle,
                max_lifetime: lifetime(self.writer.max_lifetime_secs),
                busy_timeout_ms: self.writer.busy_timeout_ms,
                ..ConnectionSettings::default()
            },
        };

        DatabaseSettings {
            read_only: self.read_only,
            reader,
            writer,
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
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with environment lookups going through `env`.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
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

    apply_overrides(&mut config, env);
    Ok(config)
}

/// Applies environment overrides read through `env`.
///
/// - `TOKENAUTH_DB_PATH` overrides `database.path`
/// - `TOKENAUTH_READ_ONLY` overrides `database.read_only` ("true" or "1");
///   `READ_ONLY_DB` and `READ_ONLY` set to "true" also enable it
/// - `TOKENAUTH_SEED_COUNT` overrides `seed.count` (positive integers only)
/// - `TOKENAUTH_LOG_LEVEL` overrides `logging.level`
/// - `TOKENAUTH_LOG_JSON` overrides `logging.json` ("true" or "1")
pub fn apply_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = env("TOKENAUTH_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(read_only) = env("TOKENAUTH_READ_ONLY") {
        config.database.read_only = read_only == "true" || read_only == "1";
    }
    if ["READ_ONLY_DB", "READ_ONLY"]
        .iter()
        .filter_map(|key| env(key))
        .any(|value| value.eq_ignore_ascii_case("true"))
    {
        config.database.read_only = true;
    }
    if let Some(count) = env("TOKENAUTH_SEED_COUNT") {
        match count.parse::<usize>() {
            Ok(parsed) if parsed > 0 => config.seed.count = parsed,
            _ => tracing::warn!(value = %count, "ignoring invalid TOKENAUTH_SEED_COUNT"),
        }
    }
    if let Some(level) = env("TOKENAUTH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("TOKENAUTH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
