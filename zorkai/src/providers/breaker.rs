//! Circuit breaker guarding the configured endpoint.
//!
//! ```text
//! Closed   --failure_count >= failure_threshold-->  Open
//! Open     --recovery_timeout elapsed, on check-->  HalfOpen
//! HalfOpen --success_count >= success_threshold-->  Closed
//! HalfOpen --failure_count >= failure_threshold-->  Open
//! ```
//!
//! The breaker is plain owned state mutated through `can_execute`,
//! `call_succeeded` and `call_failed`. Callers sharing one breaker between
//! tasks must hold a single lock across that triad.

use crate::config::RetryPolicy;
use crate::types::CircuitState;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: u32,
    recovery_timeout: Duration,
    success_threshold: u32,

    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            enabled: true,
            failure_threshold,
            recovery_timeout,
            success_threshold,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }

    /// A breaker that always allows calls and records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(u32::MAX, Duration::ZERO, u32::MAX)
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        if policy.circuit_breaker_enabled {
            Self::new(
                policy.failure_threshold,
                policy.recovery_timeout,
                policy.success_threshold,
            )
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn can_execute(&mut self) -> bool {
        self.can_execute_at(Instant::now())
    }

    /// Gate one attempt. An open breaker whose recovery timeout has elapsed
    /// moves to half-open and lets this call through.
    pub fn can_execute_at(&mut self, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    info!(
                        event_type = "circuit_breaker_half_open",
                        failure_count = self.failure_count,
                        "Circuit breaker half-open, probing endpoint"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn call_succeeded(&mut self) {
        if !self.enabled {
            return;
        }
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    info!(event_type = "circuit_breaker_closed", "Circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn call_failed(&mut self) {
        self.call_failed_at(Instant::now())
    }

    pub fn call_failed_at(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }
        self.failure_count = self.failure_count.saturating_add(1);
        self.success_count = 0;
        self.last_failure = Some(now);

        if self.state != CircuitState::Open && self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
            warn!(
                event_type = "circuit_breaker_opened",
                failure_count = self.failure_count,
                recovery_timeout_secs = self.recovery_timeout.as_secs_f64(),
                "Circuit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECOVERY: Duration = Duration::from_secs(30);

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, RECOVERY, 2)
    }

    fn open(b: &mut CircuitBreaker, at: Instant) {
        for _ in 0..3 {
            b.call_failed_at(at);
        }
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn starts_closed() {
        let mut b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let mut b = breaker();
        let t0 = Instant::now();
        b.call_failed_at(t0);
        b.call_failed_at(t0);
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute_at(t0));

        b.call_failed_at(t0);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute_at(t0));
    }

    #[test]
    fn success_in_closed_resets_failures() {
        let mut b = breaker();
        let t0 = Instant::now();
        b.call_failed_at(t0);
        b.call_failed_at(t0);
        b.call_succeeded();
        assert_eq!(b.failure_count(), 0);
        b.call_failed_at(t0);
        b.call_failed_at(t0);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn stays_open_before_recovery_timeout() {
        let mut b = breaker();
        let t0 = Instant::now();
        open(&mut b, t0);
        assert!(!b.can_execute_at(t0 + RECOVERY - Duration::from_millis(1)));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn half_opens_on_first_check_after_recovery_timeout() {
        let mut b = breaker();
        let t0 = Instant::now();
        open(&mut b, t0);
        assert!(b.can_execute_at(t0 + RECOVERY));
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.success_count(), 0);
        assert!(b.can_execute_at(t0 + RECOVERY));
    }

    #[test]
    fn closes_after_success_threshold() {
        let mut b = breaker();
        let t0 = Instant::now();
        open(&mut b, t0);
        assert!(b.can_execute_at(t0 + RECOVERY));

        b.call_succeeded();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.success_count(), 1);

        b.call_succeeded();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.success_count(), 0);
    }

    #[test]
    fn half_open_failure_resets_successes() {
        let mut b = breaker();
        let t0 = Instant::now();
        open(&mut b, t0);
        let t1 = t0 + RECOVERY;
        assert!(b.can_execute_at(t1));
        b.call_succeeded();

        let before = b.failure_count();
        b.call_failed_at(t1);
        assert_eq!(b.success_count(), 0);
        assert_eq!(b.failure_count(), before + 1);
        // Failures never reset on the way through half-open, so one more trips it.
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute_at(t1));
        assert!(b.can_execute_at(t1 + RECOVERY));
    }

    #[test]
    fn recovers_with_single_failure_threshold() {
        let mut b = CircuitBreaker::new(1, RECOVERY, 3);
        let t0 = Instant::now();
        b.call_failed_at(t0);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.can_execute_at(t0 + RECOVERY));
        b.call_succeeded();
        b.call_succeeded();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.call_succeeded();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn zero_recovery_timeout_half_opens_immediately() {
        let mut b = CircuitBreaker::new(5, Duration::ZERO, 2);
        let t0 = Instant::now();
        for _ in 0..5 {
            b.call_failed_at(t0);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.can_execute_at(t0));
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn disabled_breaker_is_inert() {
        let mut b = CircuitBreaker::disabled();
        let t0 = Instant::now();
        for _ in 0..100 {
            b.call_failed_at(t0);
        }
        assert!(b.can_execute_at(t0));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert!(!b.is_enabled());
    }

    #[test]
    fn from_policy_respects_enabled_flag() {
        let policy = RetryPolicy {
            circuit_breaker_enabled: false,
            ..Default::default()
        };
        assert!(!CircuitBreaker::from_policy(&policy).is_enabled());
        assert!(CircuitBreaker::from_policy(&RetryPolicy::default()).is_enabled());
    }
}
