//! Backoff schedules for scheduled work.
//!
//! Individual portal requests are never retried beyond the single
//! authorization retry in [`crate::GraphQlClient::execute`]. What does back
//! off is the scheduler: until the first sync pass succeeds the collector
//! retries it on an exponential schedule described by [`RetryConfig`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use groendus_core::RetryConfig;
//!
//! let config = RetryConfig::for_first_sync().jitter(false);
//! assert_eq!(config.delay_for_attempt(0), Duration::from_secs(30));
//! assert_eq!(config.delay_for_attempt(1), Duration::from_secs(60));
//! assert_eq!(config.delay_for_attempt(10), Duration::from_secs(600));
//! ```

use std::time::Duration;

use rand::Rng;

/// Configuration for backoff behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay (before jitter).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Schedule for the first sync pass of a freshly started collector.
    ///
    /// Starts at 30 seconds and doubles up to 10 minutes, so a portal
    /// outage at startup neither hammers the backend nor leaves the device
    /// unavailable for a full poll interval once it recovers.
    pub fn for_first_sync() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}
