// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry decisions, kept apart from the HTTP call so they can be reasoned about alone.

use std::time::Duration;

use crate::constants;
use crate::transport::DeliveryOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Stop,
}

/// Exponential backoff over at most `retries + 1` tries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 0,
            base_delay: Duration::from_millis(constants::DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(constants::DEFAULT_MAX_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// What to do after try number `attempt` (1-based) ended with `outcome`.
    ///
    /// Only [`DeliveryOutcome::RetryableFailure`] is retried. Anything else stops
    /// immediately without touching the retry budget.
    #[must_use]
    pub fn next(&self, attempt: u32, outcome: &DeliveryOutcome) -> RetryDecision {
        match outcome {
            DeliveryOutcome::RetryableFailure(_) if attempt <= self.retries => {
                RetryDecision::RetryAfter(self.delay(attempt))
            }
            _ => RetryDecision::Stop,
        }
    }

    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        }
    }

    fn retryable() -> DeliveryOutcome {
        DeliveryOutcome::RetryableFailure("500".to_string())
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = policy(10);
        let delays: Vec<_> = (1..=6).map(|a| policy.delay(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(policy.delay(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_retries_until_budget_spent() {
        let policy = policy(2);
        assert_eq!(
            policy.next(1, &retryable()),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.next(2, &retryable()),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(policy.next(3, &retryable()), RetryDecision::Stop);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_only_retryable_failures_retry() {
        let policy = policy(5);
        assert_eq!(
            policy.next(1, &DeliveryOutcome::FatalFailure("closed".to_string())),
            RetryDecision::Stop
        );
        assert_eq!(policy.next(1, &DeliveryOutcome::Success), RetryDecision::Stop);
    }

    #[test]
    fn test_zero_retries_means_one_try() {
        let policy = policy(0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.next(1, &retryable()), RetryDecision::Stop);
    }

    #[test]
    fn test_delays_never_decrease() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..40).map(|a| policy.delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }
}
