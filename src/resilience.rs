//! Resilience utilities: retry/backoff and rate limiting.
//!
//! - [`RetryConfig`]: bounded exponential backoff with jitter, used by the
//!   broadcast transport and (with infinite attempts) by the stream reader's
//!   reconnect loop
//! - [`RateLimiter`]: token bucket to smooth apply bursts after a reconnect
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() {
//! use event_replication::resilience::{RateLimiter, RateLimitConfig, RetryConfig};
//!
//! let retry = RetryConfig::default();
//! let pause = retry.jittered_delay_for_attempt(3); // somewhere in [200ms, 400ms]
//! # let _ = pause;
//!
//! let apply_budget = RateLimiter::new(RateLimitConfig::default());
//! apply_budget.acquire().await; // waits while the bucket is empty
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use rand::Rng;
use std::num::NonZeroU32;
use std::time::Duration;

/// Retry behaviour for outbound delivery and stream reconnects.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    /// Set to `usize::MAX` for infinite retries (stream reconnects).
    pub max_attempts: usize,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 doubles the delay after each failure).
    pub backoff_factor: f64,

    /// Timeout applied to each individual request or connect.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Infinite retry for the long-lived stream subscription.
    ///
    /// # Backoff Schedule (before jitter)
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        500ms
    /// 2        1s
    /// 3        2s
    /// ...
    /// 8+       60s (cap, retry forever)
    /// ```
    pub fn daemon() -> Self {
        Self {
            max_attempts: usize::MAX,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(10),
        }
    }

    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Same schedule with a different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Un-jittered delay after the `attempt`-th failure (1-indexed, capped).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if delay_secs.is_nan() || delay_secs <= 0.0 {
            return self.initial_delay.min(self.max_delay);
        }
        if delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::try_from_secs_f64(delay_secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay for `attempt` with equal jitter: uniform in `[d/2, d]`.
    pub fn jittered_delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let half = delay / 2;
        if half.is_zero() {
            return delay;
        }
        let extra_nanos = rand::thread_rng().gen_range(0..=half.as_nanos() as u64);
        half + Duration::from_nanos(extra_nanos)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn has_attempts_left(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Apply throttle: `refill_rate` repository calls per second sustained,
/// `burst_size` back to back.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub burst_size: u32,
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_size: 100,
            refill_rate: 1000,
        }
    }
}

impl RateLimitConfig {
    /// 100/s, bursts of 10. For small stores (embedded databases, tests).
    pub fn conservative() -> Self {
        Self {
            burst_size: 10,
            refill_rate: 100,
        }
    }
}

/// Token bucket shared by one applier; one token per repository call.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Zero rates are raised to 1.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
            config,
        }
    }

    /// Wait for a token. Cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
