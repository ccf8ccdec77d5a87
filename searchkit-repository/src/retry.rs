//! Retry policy for the optimistic-concurrency update loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times `update` re-reads and re-applies a mutation after a
/// version conflict, and how long it waits in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Exponential {
                initial_ms: 10,
                max_ms: 1_000,
                multiplier: 2.0,
            },
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::None,
        }
    }

    /// Retry with a constant delay.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Constant {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    /// Retry with exponentially growing delays, capped at one second.
    pub fn exponential(max_retries: u32, initial: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Exponential {
                initial_ms: initial.as_millis() as u64,
                max_ms: 1_000,
                multiplier: 2.0,
            },
        }
    }

    /// Total number of write attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay_for_attempt(retry)
    }
}

/// Backoff strategy between conflicting attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay.
    None,
    /// Same delay every time.
    Constant {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Delay multiplied on every attempt, up to a cap.
    Exponential {
        /// First delay in milliseconds.
        initial_ms: u64,
        /// Cap in milliseconds.
        max_ms: u64,
        /// Growth factor.
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let factor = multiplier.powi(attempt.min(64) as i32);
                let millis = (*initial_ms as f64 * factor).min(*max_ms as f64);
                Duration::from_millis(millis as u64)
            }
        }
    }
}
