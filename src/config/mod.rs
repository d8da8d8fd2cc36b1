//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file. Every section is optional and
//! falls back to its defaults.
//!
//! # Example
//!
//! ```no_run
//! use quantloop::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

pub mod heartbeat;
pub mod logging;

use std::path::Path;

use serde::Deserialize;

pub use heartbeat::{HeartbeatConfig, MAX_TICK_MS};
pub use logging::LoggingConfig;

use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Periodic task driver configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML content is
    /// malformed, or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Initialize the global tracing subscriber from the `[logging]` section.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "level" }.into());
        }
        if self.heartbeat.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tick_ms",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.heartbeat.tick_ms > MAX_TICK_MS {
            return Err(ConfigError::InvalidValue {
                field: "tick_ms",
                reason: format!("must be at most {MAX_TICK_MS}"),
            }
            .into());
        }
        Ok(())
    }
}
