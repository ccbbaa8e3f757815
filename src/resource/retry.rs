// Bounded exponential backoff.
//
// `attempt` counts failures so far in the chain: after the first failure it
// is 0, so the first retry waits `base_delay`, the second `2 * base_delay`,
// and so on until `max_attempts` retries have been spent.

use crate::scheduler::{Scheduler, Task, TimerHandle};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

/// Outcome of asking the policy to schedule another attempt.
#[derive(Debug)]
pub enum RetryDecision {
    Scheduled(TimerHandle),
    Exhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A zero ceiling is bumped to one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// `base_delay * 2^attempt`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        match 2u32.checked_pow(attempt) {
            Some(factor) => self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX),
            None => Duration::MAX,
        }
    }

    /// Longest a chain can spend waiting between attempts.
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_attempts)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }

    /// Schedules `task` after `delay_for(attempt)`, or reports `Exhausted`
    /// without scheduling anything once the ceiling is reached.
    pub fn schedule_retry(
        &self,
        scheduler: &dyn Scheduler,
        attempt: u32,
        task: Task,
    ) -> RetryDecision {
        if !self.should_retry(attempt) {
            return RetryDecision::Exhausted;
        }
        let delay = self.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling retry");
        RetryDecision::Scheduled(scheduler.schedule(delay, task))
    }
}
