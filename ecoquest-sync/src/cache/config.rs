//! Configuration for the query client

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults applied to every query unless the query overrides them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long fetched data counts as fresh.
    /// Zero means every new consumer triggers a background refetch.
    pub stale_time: Duration,

    /// How long an entry without subscribers survives before eviction
    pub gc_time: Duration,

    /// Retry attempts after the first failed fetch
    pub max_retries: u32,

    /// Delay before the first retry
    pub retry_base_delay: Duration,

    /// Upper bound for the backoff delay
    pub retry_max_delay: Duration,

    /// Multiplier applied per attempt
    pub retry_backoff_factor: f64,

    /// Random variation applied to each delay (0.0 - 1.0)
    pub retry_jitter: f64,

    /// Interval of the idle-entry sweep
    pub gc_interval: Duration,

    /// Refetch invalidated entries right away when someone is subscribed
    pub refetch_on_invalidate: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),
            // 5 minutes
            gc_time: Duration::from_secs(300),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_backoff_factor: 2.0,
            retry_jitter: 0.0,
            gc_interval: Duration::from_secs(60),
            refetch_on_invalidate: true,
        }
    }
}

impl SyncConfig {
    /// Create a new builder for the configuration
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.gc_interval.is_zero() {
            return Err("gc_interval must be greater than 0".to_string());
        }

        if self.retry_backoff_factor < 1.0 {
            return Err("retry_backoff_factor must be at least 1.0".to_string());
        }

        if self.retry_jitter < 0.0 || self.retry_jitter > 1.0 {
            return Err("retry_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.retry_max_delay < self.retry_base_delay {
            return Err("retry_max_delay must not be shorter than retry_base_delay".to_string());
        }

        Ok(())
    }

    /// Retry policy built from the configured defaults
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
            .with_backoff(self.retry_base_delay, self.retry_max_delay)
            .with_factor(self.retry_backoff_factor)
            .with_jitter(self.retry_jitter)
    }

    /// No retries, short windows. For tests and scripted runs.
    pub fn testing() -> Self {
        Self {
            stale_time: Duration::from_secs(0),
            gc_time: Duration::from_millis(200),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(10),
            gc_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }
}

/// Builder for [`SyncConfig`]
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    stale_time: Option<Duration>,
    gc_time: Option<Duration>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    retry_backoff_factor: Option<f64>,
    retry_jitter: Option<f64>,
    gc_interval: Option<Duration>,
    refetch_on_invalidate: Option<bool>,
}

impl SyncConfigBuilder {
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = Some(gc_time);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set base and maximum retry delay
    pub fn retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = Some(base);
        self.retry_max_delay = Some(max);
        self
    }

    pub fn retry_backoff_factor(mut self, factor: f64) -> Self {
        self.retry_backoff_factor = Some(factor);
        self
    }

    pub fn retry_jitter(mut self, jitter: f64) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    pub fn refetch_on_invalidate(mut self, enable: bool) -> Self {
        self.refetch_on_invalidate = Some(enable);
        self
    }

    /// Build the configuration
    pub fn build(self) -> SyncConfig {
        let defaults = SyncConfig::default();

        SyncConfig {
            stale_time: self.stale_time.unwrap_or(defaults.stale_time),
            gc_time: self.gc_time.unwrap_or(defaults.gc_time),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay: self.retry_base_delay.unwrap_or(defaults.retry_base_delay),
            retry_max_delay: self.retry_max_delay.unwrap_or(defaults.retry_max_delay),
            retry_backoff_factor: self
                .retry_backoff_factor
                .unwrap_or(defaults.retry_backoff_factor),
            retry_jitter: self.retry_jitter.unwrap_or(defaults.retry_jitter),
            gc_interval: self.gc_interval.unwrap_or(defaults.gc_interval),
            refetch_on_invalidate: self
                .refetch_on_invalidate
                .unwrap_or(defaults.refetch_on_invalidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.stale_time, Duration::from_secs(0));
        assert_eq!(config.gc_time, Duration::from_secs(300));
        assert_eq!(config.max_retries, 3);
        assert!(config.refetch_on_invalidate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = SyncConfig::default();
        invalid.retry_jitter = 1.5;
        assert!(invalid.validate().is_err());

        let mut invalid = SyncConfig::default();
        invalid.retry_backoff_factor = 0.5;
        assert!(invalid.validate().is_err());

        let mut invalid = SyncConfig::default();
        invalid.gc_interval = Duration::from_secs(0);
        assert!(invalid.validate().is_err());

        let invalid = SyncConfig::builder()
            .retry_delay(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::builder()
            .stale_time(Duration::from_secs(30))
            .gc_time(Duration::from_secs(600))
            .max_retries(5)
            .refetch_on_invalidate(false)
            .build();

        assert_eq!(config.stale_time, Duration::from_secs(30));
        assert_eq!(config.gc_time, Duration::from_secs(600));
        assert_eq!(config.max_retries, 5);
        assert!(!config.refetch_on_invalidate);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = SyncConfig::builder()
            .max_retries(2)
            .retry_delay(Duration::from_millis(100), Duration::from_millis(150))
            .build();

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(150));
    }

    #[test]
    fn test_testing_preset() {
        let config = SyncConfig::testing();
        assert_eq!(config.max_retries, 0);
        assert!(config.validate().is_ok());
    }
}
