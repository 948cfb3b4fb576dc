//! Reconnect backoff policies.
//!
//! A policy maps a 1-based attempt number to the time to sleep before the
//! next dial. All built-in policies are multiples of [`BASE_DELAY`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Unit every built-in policy is expressed in.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Largest exponent applied by the exponential policies.
const MAX_EXPONENT: u32 = 16;

/// Caller-supplied backoff function.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// How long to wait between dial attempts.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Always [`BASE_DELAY`].
    Constant,
    /// `attempt × BASE_DELAY`.
    Linear,
    /// `2^attempt × BASE_DELAY`.
    #[default]
    Exponential,
    /// Exponential plus up to 10% random jitter, to spread out reconnect
    /// storms when many tasks observe the same drop.
    ExponentialJitter,
    /// Any other mapping.
    #[serde(skip)]
    Custom(BackoffFn),
}

impl BackoffPolicy {
    /// Wrap a closure as a policy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay before retrying after failed attempt number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant => BASE_DELAY,
            Self::Linear => BASE_DELAY.saturating_mul(attempt),
            Self::Exponential => exponential(attempt),
            Self::ExponentialJitter => {
                let delay = exponential(attempt);
                let jitter_range = delay.as_millis() as u64 / 10;
                let jitter = if jitter_range > 0 {
                    rand::thread_rng().gen_range(0..jitter_range)
                } else {
                    0
                };
                delay + Duration::from_millis(jitter)
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

fn exponential(attempt: u32) -> Duration {
    BASE_DELAY.saturating_mul(2u32.saturating_pow(attempt.min(MAX_EXPONENT)))
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => f.write_str("Constant"),
            Self::Linear => f.write_str("Linear"),
            Self::Exponential => f.write_str("Exponential"),
            Self::ExponentialJitter => f.write_str("ExponentialJitter"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
