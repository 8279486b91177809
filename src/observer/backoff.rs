//! Exponential backoff for the observer's recovery paths.
//!
//! The delay is a pure function of the attempt count so recovery can be tested with paused time.
//! Waiting is done through [`wait`], which returns early when the observer shuts down.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `delay(n) = min(initial * 2^n, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_secs(initial: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(initial), Duration::from_secs(max))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// True once the delay for `attempt` has reached the ceiling.
    pub fn is_maxed(&self, attempt: u32) -> bool {
        self.delay(attempt) >= self.max
    }
}

/// Attempt counter for one failure class.
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    policy: BackoffPolicy,
    attempt: u32,
}

impl BackoffTimer {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn current_delay(&self) -> Duration {
        self.policy.delay(self.attempt)
    }

    pub fn is_maxed(&self) -> bool {
        self.policy.is_maxed(self.attempt)
    }

    /// Delay to wait now. The next call returns the doubled delay.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// # Returns
/// `true` if the full delay elapsed, `false` if cancelled.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_max() {
        let policy = BackoffPolicy::from_secs(5, 300);
        let delays: Vec<u64> = (0..8).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
        assert!(!policy.is_maxed(5));
        assert!(policy.is_maxed(6));
        assert_eq!(policy.delay(200), Duration::from_secs(300));
    }

    #[test]
    fn test_timer_reset() {
        let mut timer = BackoffTimer::new(BackoffPolicy::from_secs(1, 20));
        assert_eq!(timer.next_delay(), Duration::from_secs(1));
        assert_eq!(timer.next_delay(), Duration::from_secs(2));
        assert_eq!(timer.current_delay(), Duration::from_secs(4));
        timer.reset();
        assert_eq!(timer.current_delay(), Duration::from_secs(1));
        assert_eq!(timer.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_and_cancels() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        assert!(wait(Duration::from_secs(10), &cancel).await);
        assert!(start.elapsed() >= Duration::from_secs(10));

        cancel.cancel();
        assert!(!wait(Duration::from_secs(10), &cancel).await);
    }
}
