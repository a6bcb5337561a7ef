//! Configuration System using Figment
//!
//! Strongly-typed configuration for the sequencing utilities. Configuration is
//! loaded from (in order of precedence, highest last):
//! 1. Built-in defaults (the values the operator scripts always used)
//! 2. TOML configuration file (default: `config/agilent4uhv.toml`, may be absent)
//! 3. Environment variables prefixed with `AGILENT4UHV_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! AGILENT4UHV_APPLICATION__LOG_LEVEL=debug
//! AGILENT4UHV_TIMING__SETTLE_MS=250
//! AGILENT4UHV_WRITER__BACKEND=caput
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vacs_uhv::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     println!("Settle time: {:?}", config.timing.settle());
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/agilent4uhv.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Write timeouts, settle time and waiting-tick policy
    #[serde(default)]
    pub timing: TimingConfig,
    /// Device inventory service
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Process-variable writer backend
    #[serde(default)]
    pub writer: WriterConfig,
    /// Progress event channel
    #[serde(default)]
    pub events: EventsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Timing of device writes and of the waiting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Timeout handed to every process-variable write
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Pause after every write so the controller can apply it
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// The waiting phase reports at most about this many ticks
    #[serde(default = "default_tick_divisor")]
    pub tick_divisor: u32,
    /// Lower bound for one waiting tick
    #[serde(default = "default_min_tick")]
    pub min_tick_ms: u64,
}

/// Device inventory service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Inventory endpoint
    pub url: String,
    /// Value of the `type` query parameter
    pub device_type: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Which writer backend issues process-variable writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WriterBackend {
    /// Log every write and touch nothing
    #[default]
    DryRun,
    /// Shell out to the EPICS `caput` tool
    Caput,
}

/// Writer backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: WriterBackend,
    /// Path or name of the `caput` executable
    #[serde(default = "default_caput_path")]
    pub caput_path: String,
}

/// Progress event channel configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_write_timeout() -> u64 {
    1000
}

fn default_settle() -> u64 {
    500
}

fn default_tick_divisor() -> u32 {
    100
}

fn default_min_tick() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_caput_path() -> String {
    "caput".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "agilent4uhv".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
            settle_ms: default_settle(),
            tick_divisor: default_tick_divisor(),
            min_tick_ms: default_min_tick(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "http://10.0.38.42:26001/devices".to_string(),
            device_type: "agilent".to_string(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            backend: WriterBackend::default(),
            caput_path: default_caput_path(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl TimingConfig {
    /// Timeout for a single write.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Pause after every write.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Waiting tick for a given delay: `ceil(delay / tick_divisor)` whole seconds,
    /// never shorter than `min_tick_ms`.
    ///
    /// A 600 s delay ticks every 6 s; a 10 s delay every 1 s.
    pub fn tick_for(&self, delay: Duration) -> Duration {
        let divisor = f64::from(self.tick_divisor.max(1));
        let secs = (delay.as_secs_f64() / divisor).ceil();
        Duration::from_secs_f64(secs).max(Duration::from_millis(self.min_tick_ms))
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Config {
    /// Load configuration from the default path and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("AGILENT4UHV_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Timing values are non-zero where a zero would stall or spin
    /// - Directory endpoint and device type are present
    /// - Event channel capacity is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.timing.write_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.write_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.timing.tick_divisor == 0 {
            return Err(ConfigError::ValidationError(
                "timing.tick_divisor must be > 0".to_string(),
            ));
        }
        if self.timing.min_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.min_tick_ms must be > 0".to_string(),
            ));
        }

        if self.directory.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "directory.url cannot be empty".to_string(),
            ));
        }
        if self.directory.device_type.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "directory.device_type cannot be empty".to_string(),
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.channel_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
