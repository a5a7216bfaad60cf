//! Backoff schedules.
//!
//! A schedule maps the 1-based index of the attempt that just failed to the
//! delay before the next one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Delay between retry attempts
#[derive(Clone, Default)]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,
    /// Same delay every time
    Constant(Duration),
    /// `base * attempt`
    Linear {
        /// Delay after the first failure
        base: Duration,
    },
    /// `base * 2^(attempt - 1)`, optionally capped
    Exponential {
        /// Delay after the first failure
        base: Duration,
        /// Upper bound on any single delay
        max_delay: Option<Duration>,
    },
    /// Caller-defined schedule
    Custom(DelayFn),
}

impl Backoff {
    /// Constant delay
    #[must_use]
    pub const fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Linear delay
    #[must_use]
    pub const fn linear(base: Duration) -> Self {
        Self::Linear { base }
    }

    /// Uncapped exponential delay
    #[must_use]
    pub const fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            max_delay: None,
        }
    }

    /// Caller-defined delay
    pub fn custom<F>(schedule: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(schedule))
    }

    /// Cap exponential delays; other schedules are returned unchanged
    #[must_use]
    pub fn with_max_delay(self, max: Duration) -> Self {
        match self {
            Self::Exponential { base, .. } => Self::Exponential {
                base,
                max_delay: Some(max),
            },
            other => other,
        }
    }

    /// Delay after attempt `attempt` failed; attempt 0 is treated as 1
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => *delay,
            Self::Linear { base } => base.checked_mul(attempt).unwrap_or(Duration::MAX),
            Self::Exponential { base, max_delay } => {
                let delay = 2u32
                    .checked_pow(attempt - 1)
                    .and_then(|factor| base.checked_mul(factor))
                    .unwrap_or(Duration::MAX);
                max_delay.map_or(delay, |max| delay.min(max))
            }
            Self::Custom(schedule) => schedule(attempt),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Constant(delay) => f.debug_tuple("Constant").field(delay).finish(),
            Self::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Self::Exponential { base, max_delay } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max_delay", max_delay)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
