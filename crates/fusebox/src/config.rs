//! Immutable breaker configuration with builder and validation.

use std::time::Duration;

use crate::constants::{DEFAULT_ALFA, DEFAULT_BREAK_THRESHOLD, DEFAULT_INITIAL_RECOVER};
use crate::error::{ConfigError, ConfigResult};

/// Parameters fixed at breaker construction.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// EMA level in `(0, 1]` that trips the breaker. The circuit opens when
    /// the smoothed failure proportion rises strictly above this value.
    pub break_threshold: f64,
    /// Base cooling-off period after the circuit opens. Doubled (with
    /// jitter) on every consecutive failed half-open probe.
    pub initial_recover: Duration,
    /// EMA smoothing coefficient in `(0, 1]`; larger values weigh recent
    /// outcomes more heavily.
    pub alfa: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            break_threshold: DEFAULT_BREAK_THRESHOLD,
            initial_recover: DEFAULT_INITIAL_RECOVER,
            alfa: DEFAULT_ALFA,
        }
    }
}

impl BreakerConfig {
    /// Start building a configuration.
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }

    /// Check every parameter against its documented domain.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.break_threshold > 0.0 && self.break_threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "break_threshold must be in (0, 1], got {}",
                    self.break_threshold
                ),
            });
        }

        if self.initial_recover.is_zero() {
            return Err(ConfigError::Invalid {
                message: "initial_recover must be greater than zero".to_string(),
            });
        }

        if !(self.alfa > 0.0 && self.alfa <= 1.0) {
            return Err(ConfigError::Invalid {
                message: format!("alfa must be in (0, 1], got {}", self.alfa),
            });
        }

        Ok(())
    }
}

/// Fluent builder for [`BreakerConfig`].
#[derive(Debug, Default)]
pub struct BreakerConfigBuilder {
    config: BreakerConfig,
}

impl BreakerConfigBuilder {
    /// Builder seeded with the default configuration.
    pub fn new() -> Self {
        Self { config: BreakerConfig::default() }
    }

    /// EMA level that trips the breaker.
    pub fn break_threshold(mut self, threshold: f64) -> Self {
        self.config.break_threshold = threshold;
        self
    }

    /// Base cooling-off period.
    pub fn initial_recover(mut self, duration: Duration) -> Self {
        self.config.initial_recover = duration;
        self
    }

    /// Base cooling-off period in milliseconds.
    pub fn initial_recover_millis(mut self, millis: u64) -> Self {
        self.config.initial_recover = Duration::from_millis(millis);
        self
    }

    /// EMA smoothing coefficient.
    pub fn alfa(mut self, alfa: f64) -> Self {
        self.config.alfa = alfa;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> ConfigResult<BreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
