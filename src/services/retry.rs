//! Bounded retry with pluggable backoff, and the sleeper it waits through.

use async_trait::async_trait;
use std::time::Duration;

/// Step used by the linear backoff of both reconcilers.
pub const BACKOFF_STEP: Duration = Duration::from_secs(30);

/// How many failures are tolerated and how long to wait after each one.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Failures allowed before giving up. Giving up happens on failure `max_failures + 1`.
    pub max_failures: u32,
    /// Delay after the n-th consecutive failure (n starts at 1).
    pub backoff: fn(u32) -> Duration,
}

impl RetryPolicy {
    /// `failures × 30s` between attempts.
    pub fn linear(max_failures: u32) -> Self {
        Self {
            max_failures,
            backoff: linear_backoff,
        }
    }

    pub fn start(&self) -> Retry {
        Retry {
            policy: *self,
            failures: 0,
        }
    }
}

fn linear_backoff(failures: u32) -> Duration {
    BACKOFF_STEP.saturating_mul(failures)
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Backoff(Duration),
    GiveUp,
}

/// Consecutive-failure counter for one retried unit of work.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
    failures: u32,
}

impl Retry {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.policy.max_failures {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Backoff((self.policy.backoff)(self.failures))
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Suspends the calling loop. Injected so tests do not wait in real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_grows_by_step() {
        let mut retry = RetryPolicy::linear(3).start();
        assert_eq!(retry.record_failure(), RetryDecision::Backoff(Duration::from_secs(30)));
        assert_eq!(retry.record_failure(), RetryDecision::Backoff(Duration::from_secs(60)));
        assert_eq!(retry.record_failure(), RetryDecision::Backoff(Duration::from_secs(90)));
        assert_eq!(retry.record_failure(), RetryDecision::GiveUp);
        assert_eq!(retry.failures(), 4);
    }

    #[test]
    fn reset_rearms_the_budget() {
        let mut retry = RetryPolicy::linear(1).start();
        retry.record_failure();
        retry.reset();
        assert_eq!(retry.failures(), 0);
        assert_eq!(retry.record_failure(), RetryDecision::Backoff(Duration::from_secs(30)));
    }

    #[test]
    fn custom_backoff_is_used() {
        let policy = RetryPolicy {
            max_failures: 2,
            backoff: |_| Duration::from_millis(5),
        };
        let mut retry = policy.start();
        assert_eq!(retry.record_failure(), RetryDecision::Backoff(Duration::from_millis(5)));
    }
}
