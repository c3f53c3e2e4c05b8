use crate::config::loader::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on live conversations after an eviction pass
    pub max_sessions: usize,

    /// Idle time after which a session is expired
    pub ttl_secs: u64,

    /// How long a caller waits for one turn
    pub request_timeout_secs: u64,

    /// Turns allowed to run at the same time across all sessions
    pub max_concurrent_requests: usize,

    /// Period of the background eviction sweep in gateway mode
    pub sweep_interval_secs: u64,

    /// Where conversations keep their transcripts
    pub storage_dir: PathBuf,

    /// Whether conversations write transcripts at all
    pub persist: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            ttl_secs: 3600,
            request_timeout_secs: 120,
            max_concurrent_requests: 32,
            sweep_interval_secs: 60,
            storage_dir: default_storage_dir(),
            persist: true,
        }
    }
}

impl Config {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Every numeric setting must be positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_sessions", self.max_sessions as u64),
            ("ttl_secs", self.ttl_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("max_concurrent_requests", self.max_concurrent_requests as u64),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be a positive integer".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dash").join("sessions"))
        .unwrap_or_else(|| PathBuf::from(".dash_sessions"))
}
