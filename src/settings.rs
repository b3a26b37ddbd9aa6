/*!
 * Runtime settings for orbit-rpc
 *
 * These are process-level knobs (timeouts, bind host, logging) and are
 * separate from the per-service configuration model in `config`.
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RpcError, RpcResult};

/// Process-level settings shared by every export/refer in a context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuntimeSettings {
    /// Bound on a protocol bind/listen, in milliseconds
    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,

    /// Bound on a single registry register/unregister, in milliseconds
    #[serde(default = "default_register_timeout_ms")]
    pub register_timeout_ms: u64,

    /// Bound on a registry subscription, in milliseconds
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,

    /// Host advertised by exported services when neither protocol nor provider sets one
    #[serde(default)]
    pub host: Option<String>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            bind_timeout_ms: default_bind_timeout_ms(),
            register_timeout_ms: default_register_timeout_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            host: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

fn default_bind_timeout_ms() -> u64 {
    3_000
}

fn default_register_timeout_ms() -> u64 {
    5_000
}

fn default_subscribe_timeout_ms() -> u64 {
    5_000
}

impl RuntimeSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> RpcResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| RpcError::config(format!("invalid settings file {}: {}", path.display(), e)))
    }

    /// Save settings to a TOML file
    pub fn to_file(&self, path: &Path) -> RpcResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RpcError::config(format!("cannot serialize settings: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
