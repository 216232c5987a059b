//! Circuit breaker for remote services (price API, ledger).
//!
//! After `failure_threshold` consecutive failures, or an explicit `trip()`,
//! the breaker opens and refuses calls until the cooldown elapses. The first
//! check after the cooldown closes it again and reports the transition so the
//! caller can replay work it deferred.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { tripped_at: Instant },
}

/// Result of asking the breaker for permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Closed and was closed already.
    Allowed,
    /// Cooldown just expired; the breaker closed on this call.
    Reopened,
    Refused,
}

impl Permit {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Permit::Refused)
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: 3,
        }
    }

    pub fn with_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold.max(1);
        self
    }

    // A poisoned lock still holds a consistent counter.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn permit(&self) -> Permit {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Permit::Allowed,
            BreakerState::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                Permit::Reopened
            }
            BreakerState::Open { .. } => Permit::Refused,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.permit().is_allowed()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.lock().state, BreakerState::Open { .. })
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    pub fn trip(&self) {
        self.lock().state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    pub fn remaining_cooldown(&self) -> Duration {
        match self.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => {
                self.cooldown.saturating_sub(tripped_at.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let cb = CircuitBreaker::new(Duration::from_secs(60)).with_threshold(2);
        cb.record_failure();
        assert_eq!(cb.permit(), Permit::Allowed);
        cb.record_failure();
        assert_eq!(cb.permit(), Permit::Refused);
        assert!(cb.is_open());
        assert!(cb.remaining_cooldown() > Duration::ZERO);
    }

    #[test]
    fn success_clears_failure_streak() {
        let cb = CircuitBreaker::new(Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.is_allowed());
    }

    #[test]
    fn reports_reopen_once_after_cooldown() {
        let cb = CircuitBreaker::new(Duration::from_millis(10));
        cb.trip();
        assert_eq!(cb.permit(), Permit::Refused);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.permit(), Permit::Reopened);
        assert_eq!(cb.permit(), Permit::Allowed);
    }
}
