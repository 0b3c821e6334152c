//! Configuration management for consultd
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files and environment variables.

use crate::error::{ConsultError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for consultd
///
/// Holds everything the engine needs: the session store location, the
/// pre-accept buffer backing, and the lifecycle timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Pre-accept message buffer configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Lifecycle timing configuration
    #[serde(default)]
    pub session: SessionConfig,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. When unset, the platform data
    /// directory is used (`CONSULTD_DB` overrides either).
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

/// Pre-accept message buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Path to the sled directory backing the buffer. When unset, a
    /// `buffer` directory next to the database is used.
    #[serde(default)]
    pub path: Option<String>,

    /// Skip sled entirely and run on the in-process fallback. Useful for
    /// tests and single-shot CLI invocations.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
        }
    }
}

/// Lifecycle timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a requested session stays pending before it expires (seconds)
    #[serde(default = "default_pending_window")]
    pub pending_window_seconds: u64,

    /// Cadence of the periodic expiry sweep (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// How recent advisor activity must be to count as "online" (seconds)
    #[serde(default = "default_online_window")]
    pub advisor_online_window_seconds: u64,
}

fn default_pending_window() -> u64 {
    900
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_online_window() -> u64 {
    600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pending_window_seconds: default_pending_window(),
            sweep_interval_seconds: default_sweep_interval(),
            advisor_online_window_seconds: default_online_window(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// A missing file is not an error: defaults apply, matching the
    /// zero-setup CLI experience.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConsultError::Yaml` when the file exists but does not parse,
    /// or `ConsultError::Io` when it exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConsultError::Config` when a timing knob is zero where the
    /// engine requires a positive duration.
    pub fn validate(&self) -> Result<()> {
        if self.session.pending_window_seconds == 0 {
            return Err(ConsultError::Config(
                "session.pending_window_seconds must be greater than zero".to_string(),
            ));
        }
        if self.session.sweep_interval_seconds == 0 {
            return Err(ConsultError::Config(
                "session.sweep_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.session.advisor_online_window_seconds == 0 {
            return Err(ConsultError::Config(
                "session.advisor_online_window_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Pending window as a `chrono::Duration`
    pub fn pending_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.pending_window_seconds as i64)
    }

    /// Sweep cadence as a `std::time::Duration`
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session.sweep_interval_seconds)
    }

    /// Advisor online window as a `chrono::Duration`
    pub fn advisor_online_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.advisor_online_window_seconds as i64)
    }
}
