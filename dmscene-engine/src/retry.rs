//! Caller-side retry policy with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;

use dmscene_core::config::RetryConfig;

/// How [`crate::service::TurnService::generate_turn_with_retry`] retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after a retryable oracle failure (0 = no retries).
    pub max_oracle_retries: u32,
    /// Delay before the first oracle retry.
    pub base_delay: Duration,
    /// Cap on exponential growth.
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay, applied both ways (0.0-1.0).
    pub jitter_factor: f64,
    /// Retry a malformed response once with the same request.
    pub retry_malformed_once: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_oracle_retries: config.max_oracle_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            retry_malformed_once: config.retry_malformed_once,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_oracle_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            retry_malformed_once: false,
        }
    }

    /// Backoff before retry number `attempt` (1-based), without jitter:
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exponential.min(max))
    }

    /// [`Self::backoff`] with ±`jitter_factor` applied.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = u64::try_from(self.backoff(attempt).as_millis()).unwrap_or(u64::MAX);
        let jitter_range = (capped as f64 * self.jitter_factor) as u64;
        if jitter_range == 0 {
            return Duration::from_millis(capped);
        }
        let low = capped.saturating_sub(jitter_range);
        let high = capped.saturating_add(jitter_range);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}
