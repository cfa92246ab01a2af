//! Exponential backoff for rate-limited calls.
//!
//! - [`BackoffPolicy`]: configuration (delay bounds, retry ceiling, jitter)
//! - [`Backoff`]: per-call cursor that yields successive delays
//!
//! The delay before retry `n` (zero based) is `min_delay * 2^n`, capped at
//! `max_delay`, optionally jittered, and always kept within
//! `[min_delay, max_delay]`.
//!
//! # Example
//!
//! ```
//! use grpcclient::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::new()
//!     .min_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(1))
//!     .max_retries(3)
//!     .jitter(0.0);
//!
//! let delays: Vec<_> = policy.backoff().collect();
//! assert_eq!(
//!     delays,
//!     vec![
//!         Duration::from_millis(100),
//!         Duration::from_millis(200),
//!         Duration::from_millis(400),
//!     ]
//! );
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default backoff values.
pub mod defaults {
    use std::time::Duration;

    /// Default delay before the first retry.
    pub const MIN_DELAY: Duration = Duration::from_millis(100);

    /// Default upper bound on any single delay.
    pub const MAX_DELAY: Duration = Duration::from_secs(10);

    /// Default maximum number of retries.
    pub const MAX_RETRIES: u32 = 10;

    /// Default jitter factor (0.2 means +/- 20%).
    pub const JITTER: f64 = 0.2;
}

/// Configuration for backoff between retries.
///
/// # Default Values
///
/// - `min_delay`: 100 milliseconds
/// - `max_delay`: 10 seconds
/// - `max_retries`: 10
/// - `jitter`: 0.2 (20%)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(rename = "min_period")]
    pub min_delay: Duration,

    /// Upper bound on any single delay. Zero means uncapped.
    #[serde(rename = "max_period")]
    pub max_delay: Duration,

    /// Maximum number of retries, not counting the initial attempt.
    /// Zero means unlimited.
    pub max_retries: u32,

    /// Jitter factor between 0.0 and 1.0.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: defaults::MIN_DELAY,
            max_delay: defaults::MAX_DELAY,
            max_retries: defaults::MAX_RETRIES,
            jitter: defaults::JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Create a new BackoffPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first retry.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the maximum number of retries. Zero means unlimited.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }

        let bounded = !self.min_delay.is_zero() && !self.max_delay.is_zero();
        if bounded && self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidBackoff {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }

    /// Create a backoff cursor for one logical call.
    pub fn backoff(&self) -> Backoff {
        Backoff::from_rng(self.clone(), StdRng::from_os_rng())
    }

    fn cap(&self) -> Duration {
        if self.max_delay.is_zero() {
            Duration::MAX
        } else {
            self.max_delay
        }
    }
}

/// One step of a [`Backoff`] cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffStep {
    /// How long to wait before the next attempt.
    pub delay: Duration,
    /// Whether the retry ceiling has been reached.
    ///
    /// When set, `delay` must not be slept on: the caller has run out of
    /// retries.
    pub done: bool,
}

/// Per-call backoff cursor.
///
/// Created fresh for every logical call and owned by that call's retry loop,
/// so it needs no synchronization.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    rng: StdRng,
    /// Number of steps taken.
    attempts: u32,
    /// Un-jittered delay for the next step.
    current_delay: Duration,
}

impl Backoff {
    /// Create a cursor whose jitter is reproducible for a fixed seed.
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self::from_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn from_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        let current_delay = policy.min_delay.min(policy.cap());
        Self {
            policy,
            rng,
            attempts: 0,
            current_delay,
        }
    }

    /// Reset the cursor to its initial state.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.policy.min_delay.min(self.policy.cap());
    }

    /// Get the number of steps taken so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Get the un-jittered delay the next step is based on.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Check if more retries are allowed.
    pub fn can_retry(&self) -> bool {
        self.policy.max_retries == 0 || self.attempts < self.policy.max_retries
    }

    /// Compute the next delay and advance the cursor.
    ///
    /// The attempt counter advances even when the step reports `done`.
    pub fn next_step(&mut self) -> BackoffStep {
        let done = !self.can_retry();
        let delay = self.jittered(self.current_delay);

        let cap = self.policy.cap();
        self.current_delay = self.current_delay.saturating_mul(2).min(cap);
        self.attempts = self.attempts.saturating_add(1);

        BackoffStep { delay, done }
    }

    fn jittered(&mut self, delay: Duration) -> Duration {
        let cap = self.policy.cap();
        let floor = self.policy.min_delay.min(cap);

        // Policies built without `validate` may carry any jitter value.
        let jitter = self.policy.jitter;
        if jitter.is_nan() || jitter <= 0.0 {
            return delay.clamp(floor, cap);
        }
        let jitter = jitter.min(1.0);

        let secs = delay.as_secs_f64() * (1.0 + self.rng.random_range(-jitter..=jitter));
        if secs.is_nan() || secs <= 0.0 {
            return floor;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(cap)
            .clamp(floor, cap)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    /// Yields delays until the retry ceiling is reached.
    fn next(&mut self) -> Option<Duration> {
        let step = self.next_step();
        (!step.done).then_some(step.delay)
    }
}
