//! Reconnect backoff policy
//!
//! A connection manager sleeps for [`BackoffPolicy::delay`] between a failed
//! attempt and the next one. The default is a fixed wait of five seconds;
//! multiplier, cap and jitter turn it into exponential backoff.
//!
//! ```
//! use riaktive_core_resilience::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1));
//! assert_eq!(policy.delay(1), Duration::from_millis(100));
//! assert_eq!(policy.delay(2), Duration::from_millis(200));
//! assert_eq!(policy.delay(10), Duration::from_secs(1));
//! ```

use rand::Rng;
use std::time::Duration;

/// Delay schedule applied after each consecutive connection failure
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub wait: Duration,

    /// Factor applied per additional consecutive failure (1.0 = fixed delay)
    pub multiplier: f64,

    /// Upper bound for the computed delay
    pub max_wait: Option<Duration>,

    /// Random extra delay as a fraction of the computed one (0.0 disables)
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(5000))
    }
}

impl BackoffPolicy {
    /// Same delay after every failure
    pub fn fixed(wait: Duration) -> Self {
        Self {
            wait,
            multiplier: 1.0,
            max_wait: None,
            jitter_factor: 0.0,
        }
    }

    /// Doubling delay starting at `initial`, capped at `max`
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            wait: initial,
            multiplier: 2.0,
            max_wait: Some(max),
            jitter_factor: 0.0,
        }
    }

    /// Add up to `factor` of random extra delay
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.max(0.0);
        self
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.wait.as_secs_f64() * self.multiplier.max(0.0).powi(exponent);
        let base = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        let capped = match self.max_wait {
            Some(max) => base.min(max),
            None => base,
        };

        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let extra = Duration::try_from_secs_f64(capped.as_secs_f64() * jitter)
                .unwrap_or(Duration::ZERO);
            capped.saturating_add(extra)
        } else {
            capped
        }
    }
}
