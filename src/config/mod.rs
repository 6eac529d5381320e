//! Configuration for the stream-size scheduler.
//!
//! Hierarchical loading with defaults in code, an optional file override and
//! environment variables on top:
//! 1. Type defaults (lowest priority)
//! 2. Configuration file passed to [`SchedulerConfig::load`]
//! 3. Environment variables with the `STREAM_SCHED__` prefix (highest)

use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Error;
use crate::errors::Result;

/// Environment variable prefix for overrides, e.g.
/// `STREAM_SCHED__POLLING_DELAY_SECS=60`.
pub const ENV_PREFIX: &str = "STREAM_SCHED";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Fallback polling cadence in seconds, applied per stream while at least
    /// one of its schedules is active. Converted to milliseconds once at
    /// startup. Must be greater than 0.
    #[serde(default = "default_polling_delay_secs")]
    pub polling_delay_secs: u64,
}

fn default_polling_delay_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            polling_delay_secs: default_polling_delay_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from defaults and environment variables.
    pub fn new() -> Result<Self> {
        Self::load(None)
    }

    /// Loads configuration, optionally merging a configuration file between
    /// the defaults and the environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates all scheduler configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.polling_delay_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "polling_delay_secs must be greater than 0".into(),
            )));
        }
        Ok(())
    }

    pub fn polling_delay(&self) -> Duration {
        Duration::from_secs(self.polling_delay_secs)
    }
}
