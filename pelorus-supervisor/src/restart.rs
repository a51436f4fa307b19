//! Restart policy
//!
//! Pure decision logic, separated from the coordinator so it can be
//! reasoned about and tested without processes or timers. The restart
//! counter only ever grows for a given launch history; it resets solely
//! through an operator-initiated restart.

use std::time::Duration;

/// What to do about a failed agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Relaunch after the given delay
    RetryAfter(Duration),
    /// Budget exhausted; park the agent in maintenance
    GiveUp,
}

/// Maps a restart attempt number to a delay
///
/// `attempt` is the number of restarts already consumed, so the first
/// retry is computed with `attempt == 0`.
pub trait BackoffPolicy: Send + Sync {
    fn delay_for(&self, attempt: u32, base: Duration) -> Duration;
}

/// Constant delay between retries
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay;

impl BackoffPolicy for FixedDelay {
    fn delay_for(&self, _attempt: u32, base: Duration) -> Duration {
        base
    }
}

/// Doubling delay, capped at a multiple of the base
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Largest multiplier ever applied to the base delay
    pub max_multiplier: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { max_multiplier: 16 }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32, base: Duration) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt)
            .unwrap_or(self.max_multiplier)
            .min(self.max_multiplier);
        base.saturating_mul(multiplier)
    }
}

/// Decide whether a failed agent gets another launch
///
/// `restart_count` restarts have already been consumed out of a budget of
/// `max_restarts`; once the budget is spent the agent is given up on.
pub fn decide(
    restart_count: u32,
    max_restarts: u32,
    restart_delay: Duration,
    backoff: &dyn BackoffPolicy,
) -> RestartDecision {
    if restart_count >= max_restarts {
        RestartDecision::GiveUp
    } else {
        RestartDecision::RetryAfter(backoff.delay_for(restart_count, restart_delay))
    }
}
