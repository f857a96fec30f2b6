//! Retry policy for scheduled content
//!
//! Delays double per failed attempt: after the Nth failure the item is
//! re-armed at `failed_at + base_delay * 2^N`.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::{DeliveryError, DeliveryErrorKind};

/// Exponent cap; keeps the shift and the chrono conversion in range
const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an item fails for good
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Retry destination rejections like network failures
    pub retry_rejected: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            retry_rejected: true,
        }
    }
}

/// What to do with an item after a failed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt_at: DateTime<Utc> },
    GiveUp { reason: String },
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.base_delay,
            retry_rejected: config.retry_rejected,
        }
    }

    /// Delay before the next attempt once `attempts` have failed
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32 << attempts.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide the fate of an item whose `attempts`-th delivery failed at
    /// `failed_at`
    pub fn decide(&self, attempts: u32, error: &DeliveryError, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) reached", self.max_attempts),
            };
        }

        if error.kind() == DeliveryErrorKind::Rejected && !self.retry_rejected {
            return RetryDecision::GiveUp {
                reason: "rejected by destination".to_string(),
            };
        }

        // Clamp to at least 1ms so a re-armed item is always strictly later
        let delay = chrono::Duration::from_std(self.backoff(attempts))
            .unwrap_or_else(|_| chrono::Duration::days(365))
            .max(chrono::Duration::milliseconds(1));

        RetryDecision::Retry {
            next_attempt_at: failed_at + delay,
        }
    }
}
