//! Process configuration, read once at start-up.
//!
//! Built-in defaults are layered under environment variables with `figment`.
//! The binary loads a `.env` file (if any) into the environment first.
//!
//! | variable                        | default       |
//! |---------------------------------|---------------|
//! | `DATABASE_URL`                  | `taskline.db` |
//! | `ENVIRONMENT`                   | `development` |
//! | `HOST`                          | `0.0.0.0`     |
//! | `PORT`                          | `8000`        |
//! | `QUEUE_BACKEND`                 | `sqlite`      |
//! | `QUEUE_VISIBILITY_TIMEOUT_SECS` | `30`          |
//! | `QUEUE_WAIT_SECONDS`            | `10` (≤ 20)   |
//! | `QUEUE_MAX_MESSAGES`            | `1` (1..=10)  |
//! | `WORKER_PROCESS_TIMEOUT_SECS`   | unset         |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::PollSettings;

pub const MAX_WAIT_SECONDS: u64 = 20;
pub const MAX_MESSAGES: usize = 10;

/// Variables read from the environment (matched case-insensitively).
const ENV_KEYS: [&str; 9] = [
    "database_url",
    "environment",
    "host",
    "port",
    "queue_backend",
    "queue_visibility_timeout_secs",
    "queue_wait_seconds",
    "queue_max_messages",
    "worker_process_timeout_secs",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: impl fmt::Display, reason: impl fmt::Display) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Sqlite,
    Memory,
}

impl QueueBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueBackend::Sqlite => "sqlite",
            QueueBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw shape of the environment, one field per variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvSettings {
    database_url: String,
    environment: String,
    host: String,
    port: u16,
    queue_backend: QueueBackend,
    queue_visibility_timeout_secs: u64,
    queue_wait_seconds: u64,
    queue_max_messages: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    worker_process_timeout_secs: Option<u64>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            database_url: "taskline.db".to_string(),
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            queue_backend: QueueBackend::Sqlite,
            queue_visibility_timeout_secs: 30,
            queue_wait_seconds: 10,
            queue_max_messages: 1,
            worker_process_timeout_secs: None,
        }
    }
}

impl EnvSettings {
    fn validate(self) -> Result<Config, ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::invalid("DATABASE_URL", "", "must not be empty"));
        }
        if self.queue_wait_seconds > MAX_WAIT_SECONDS {
            return Err(ConfigError::invalid(
                "QUEUE_WAIT_SECONDS",
                self.queue_wait_seconds,
                format!("must be at most {MAX_WAIT_SECONDS}"),
            ));
        }
        if !(1..=MAX_MESSAGES).contains(&self.queue_max_messages) {
            return Err(ConfigError::invalid(
                "QUEUE_MAX_MESSAGES",
                self.queue_max_messages,
                format!("must be between 1 and {MAX_MESSAGES}"),
            ));
        }
        if self.queue_visibility_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                0,
                "must be positive",
            ));
        }

        Ok(Config {
            database_path: database_path(&self.database_url),
            environment: self.environment,
            host: self.host,
            port: self.port,
            queue_backend: self.queue_backend,
            visibility_timeout: Duration::from_secs(self.queue_visibility_timeout_secs),
            queue_wait: Duration::from_secs(self.queue_wait_seconds),
            queue_max_messages: self.queue_max_messages,
            process_timeout: self.worker_process_timeout_secs.map(Duration::from_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub queue_backend: QueueBackend,
    pub visibility_timeout: Duration,
    pub queue_wait: Duration,
    pub queue_max_messages: usize,
    pub process_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("taskline.db"),
            environment: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            queue_backend: QueueBackend::Sqlite,
            visibility_timeout: Duration::from_secs(30),
            queue_wait: Duration::from_secs(10),
            queue_max_messages: 1,
            process_timeout: None,
        }
    }
}

impl Config {
    /// Defaults, then the environment (highest priority).
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(EnvSettings::default()))
            .merge(Env::raw().only(&ENV_KEYS))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        figment.extract::<EnvSettings>()?.validate()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            max_messages: self.queue_max_messages,
            wait: self.queue_wait,
            ..PollSettings::default()
        }
    }
}

/// Accepts a bare path or a `sqlite://` / `sqlite:` URL.
fn database_path(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}
