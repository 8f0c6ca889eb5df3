//! Configuration management with validation and defaults
//!
//! Values come from built-in defaults, an optional TOML file, and finally
//! environment variable overrides.

use crate::{
    errors::ConfigurationError,
    games::{
        crash_point::MAX_CRASH_POINT,
        multiplier::{DEFAULT_ROUND_DURATION, DEFAULT_TICK_INTERVAL},
    },
    prices::source::DEFAULT_COINGECKO_URL,
};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
    pub game: GameConfig,
    pub prices: PriceConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

/// Round timing and economics
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Secret mixed into every crash point; a random seed is drawn at startup
    /// when left empty
    pub server_seed: String,
    pub round_duration_ms: u64,
    pub tick_interval_ms: u64,
    pub bet_wait_ms: u64,
    pub min_round_gap_ms: u64,
    pub max_crash_point: f64,
    pub starting_balance: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server_seed: "static-secret-seed".to_string(),
            round_duration_ms: DEFAULT_ROUND_DURATION.as_millis() as u64,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            bet_wait_ms: 10_000,
            min_round_gap_ms: 3_000,
            max_crash_point: MAX_CRASH_POINT,
            starting_balance: 5.0,
        }
    }
}

impl GameConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_millis(self.round_duration_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn bet_wait(&self) -> Duration {
        Duration::from_millis(self.bet_wait_ms)
    }

    pub fn min_round_gap(&self) -> Duration {
        Duration::from_millis(self.min_round_gap_ms)
    }

    /// Draw a random seed when none is configured. Returns true if one was
    /// generated.
    pub fn ensure_server_seed(&mut self) -> bool {
        if !self.server_seed.trim().is_empty() {
            return false;
        }
        let bytes: [u8; 32] = rand::random();
        self.server_seed = hex::encode(bytes);
        true
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub source_url: String,
    /// Refresh period, also the quote TTL
    pub refresh_interval_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_COINGECKO_URL.to_string(),
            refresh_interval_secs: 10,
            max_retries: 3,
            initial_backoff_ms: 2_000,
            request_timeout_secs: 10,
        }
    }
}

impl PriceConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Rocksdb,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Rocksdb,
            data_directory: "./DB/crash_data".to_string(),
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<CrashConfig, ConfigurationError> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => CrashConfig::default(),
        };

        Self::apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<CrashConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        parse_toml(&content)
    }

    fn apply_env_overrides(config: &mut CrashConfig) -> Result<(), ConfigurationError> {
        if let Ok(seed) = env::var("CRASH_SERVER_SEED") {
            config.game.server_seed = seed;
        }
        if let Ok(host) = env::var("CRASH_API_HOST") {
            config.api.host = host;
        }
        if let Ok(port) = env::var("CRASH_API_PORT") {
            config.api.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "CRASH_API_PORT".to_string(),
                value: port,
                reason: "Invalid port number".to_string(),
            })?;
        }
        if let Ok(data_dir) = env::var("CRASH_DATA_DIR") {
            config.storage.data_directory = data_dir;
        }
        if let Ok(backend) = env::var("CRASH_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_lowercase().as_str() {
                "rocksdb" => StorageBackend::Rocksdb,
                "memory" => StorageBackend::Memory,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "CRASH_STORAGE_BACKEND".to_string(),
                        value: backend,
                        reason: "Expected 'rocksdb' or 'memory'".to_string(),
                    })
                }
            };
        }
        if let Ok(url) = env::var("COINGECKO_API") {
            config.prices.source_url = url;
        }

        Ok(())
    }
}

pub fn parse_toml(content: &str) -> Result<CrashConfig, ConfigurationError> {
    toml::from_str(content)
        .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate configuration values
pub fn validate(config: &CrashConfig) -> Result<(), ConfigurationError> {
    let game = &config.game;
    if game.round_duration_ms == 0 {
        return Err(invalid("game.round_duration_ms", 0, "Round duration cannot be zero"));
    }
    if game.tick_interval_ms == 0 || game.tick_interval_ms > game.round_duration_ms {
        return Err(invalid(
            "game.tick_interval_ms",
            game.tick_interval_ms,
            "Tick interval must be positive and no longer than the round",
        ));
    }
    if !(game.max_crash_point >= 1.0) {
        return Err(invalid("game.max_crash_point", game.max_crash_point, "Must be at least 1.0"));
    }
    if !(game.starting_balance >= 0.0) {
        return Err(invalid("game.starting_balance", game.starting_balance, "Cannot be negative"));
    }
    if config.prices.refresh_interval_secs == 0 {
        return Err(invalid("prices.refresh_interval_secs", 0, "Refresh interval cannot be zero"));
    }
    if config.api.port == 0 {
        return Err(invalid("api.port", 0, "Port cannot be zero"));
    }
    if config.storage.backend == StorageBackend::Rocksdb && config.storage.data_directory.is_empty() {
        return Err(invalid("storage.data_directory", "", "Required for the rocksdb backend"));
    }
    Ok(())
}
