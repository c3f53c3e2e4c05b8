use crate::config::schema::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
static CONFIG_TEST_ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_MAX_SESSIONS: &str = "DASH_MAX_SESSIONS";
const ENV_TTL_SECS: &str = "DASH_SESSION_TTL_SECS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "DASH_REQUEST_TIMEOUT_SECS";
const ENV_MAX_CONCURRENT_REQUESTS: &str = "DASH_MAX_CONCURRENT_REQUESTS";
const ENV_SWEEP_INTERVAL_SECS: &str = "DASH_SWEEP_INTERVAL_SECS";
const ENV_STORAGE_DIR: &str = "DASH_STORAGE_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file contains invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Values given on the command line; highest precedence
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_sessions: Option<usize>,
    pub ttl_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub storage_dir: Option<PathBuf>,
    pub no_persist: bool,
}

pub fn load_config(overrides: &CliOverrides, cli_config_path: Option<PathBuf>) -> Result<Config> {
    tracing::debug!("Loading configuration");

    let mut config = Config::default();

    // Layer 1: config file (~/.dash/config.json or --config)
    let config_file = cli_config_path.or_else(get_default_config_path);

    if let Some(ref path) = config_file {
        if path.exists() {
            tracing::debug!(config_path = %path.display(), "Loading configuration from file");
            config = read_config_file(path)?;
        } else {
            tracing::debug!(config_path = %path.display(), "Config file not found, using defaults");
        }
    }

    // Layer 2: environment variables
    config = merge_env_variables(config);

    // Layer 3: CLI flags
    apply_cli_overrides(&mut config, overrides);

    config.validate()?;

    tracing::debug!(
        max_sessions = config.max_sessions,
        ttl_secs = config.ttl_secs,
        request_timeout_secs = config.request_timeout_secs,
        max_concurrent_requests = config.max_concurrent_requests,
        storage_dir = %config.storage_dir.display(),
        persist = config.persist,
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".dash").join("config.json"))
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(ConfigError::IoError)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    Ok(config)
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok().filter(|v| !v.trim().is_empty())?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

fn merge_env_variables(config: Config) -> Config {
    tracing::debug!("Applying environment variable overrides");

    Config {
        max_sessions: env_value(ENV_MAX_SESSIONS).unwrap_or(config.max_sessions),
        ttl_secs: env_value(ENV_TTL_SECS).unwrap_or(config.ttl_secs),
        request_timeout_secs: env_value(ENV_REQUEST_TIMEOUT_SECS)
            .unwrap_or(config.request_timeout_secs),
        max_concurrent_requests: env_value(ENV_MAX_CONCURRENT_REQUESTS)
            .unwrap_or(config.max_concurrent_requests),
        sweep_interval_secs: env_value(ENV_SWEEP_INTERVAL_SECS)
            .unwrap_or(config.sweep_interval_secs),
        storage_dir: env_value(ENV_STORAGE_DIR).unwrap_or(config.storage_dir),
        persist: config.persist,
    }
}

fn apply_cli_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(max_sessions) = overrides.max_sessions {
        config.max_sessions = max_sessions;
    }
    if let Some(ttl_secs) = overrides.ttl_secs {
        config.ttl_secs = ttl_secs;
    }
    if let Some(timeout) = overrides.request_timeout_secs {
        config.request_timeout_secs = timeout;
    }
    if let Some(ref dir) = overrides.storage_dir {
        config.storage_dir = dir.clone();
    }
    if overrides.no_persist {
        config.persist = false;
    }
}

pub fn get_config_path() -> Option<PathBuf> {
    get_default_config_path()
}
