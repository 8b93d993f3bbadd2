//! Exponential back-off with jitter and rate-limit wait semantics (§4.6).

use std::time::Duration;

use llmgate_core::ErrorKind;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("timeout exceeded while waiting on {0}")]
    TimeoutExceeded(String),
    #[error("fatal error, not retried: {0}")]
    Fatal(String),
    #[error("call cancelled")]
    Cancelled,
}

/// Back-off/wait policy (the subset of `MergedConfig.resilience` this engine
/// consumes).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_s: f64,
    pub max_delay_s: f64,
    pub wait_on_rate_limit: bool,
    pub retry_budget_s: f64,
    pub max_wait_timeout_s: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_s: 0.5,
            max_delay_s: 30.0,
            wait_on_rate_limit: false,
            retry_budget_s: 60.0,
            max_wait_timeout_s: 120.0,
        }
    }
}

/// What to do next after an attempt failed, decided by the policy.
pub enum NextStep {
    RetryAfter(Duration),
    WaitThenRetry(Duration),
    GiveUp,
}

/// Drives the back-off/retry loop for a single call. One instance per call —
/// it tracks the attempt counter and cumulative wait for that call only.
pub struct RetryEngine {
    policy: RetryPolicy,
    attempt: u32,
    cumulative_wait_s: f64,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0, cumulative_wait_s: 0.0 }
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// `delay_i = min(max_delay_s, base_delay_s * 2^i) * (1 + jitter in [0, 0.3])`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.policy.base_delay_s * 2f64.powi(attempt as i32);
        let capped = exp.min(self.policy.max_delay_s);
        let jitter = rand::thread_rng().gen_range(0.0..0.3);
        Duration::from_secs_f64(capped * (1.0 + jitter))
    }

    /// Classifies `kind` and decides the next step. Returns `Err` when the
    /// call must stop retrying: `Fatal`/`Cancelled` immediately, or
    /// `TimeoutExceeded` once the retry budget or max-retries bound is hit.
    pub fn next_step(&mut self, kind: &ErrorKind, wait_hint_override: Option<f64>) -> Result<NextStep, RetryError> {
        match kind {
            ErrorKind::Fatal => Err(RetryError::Fatal("adapter reported a fatal error".into())),
            ErrorKind::Auth => Err(RetryError::Fatal("adapter reported an authentication error".into())),
            ErrorKind::Cancelled => Err(RetryError::Cancelled),
            ErrorKind::RateLimited { wait_hint_s } => {
                if !self.policy.wait_on_rate_limit {
                    return Err(RetryError::Fatal("rate limited and wait_on_rate_limit is false".into()));
                }
                let hint = wait_hint_override.or(*wait_hint_s).unwrap_or(0.0);
                let backoff = self.backoff_delay(self.attempt).as_secs_f64();
                let wait_s = hint.max(backoff);

                if self.cumulative_wait_s + wait_s > self.policy.max_wait_timeout_s {
                    return Err(RetryError::TimeoutExceeded("rate-limit wait ceiling".into()));
                }
                self.cumulative_wait_s += wait_s;
                self.attempt += 1;
                Ok(NextStep::WaitThenRetry(Duration::from_secs_f64(wait_s)))
            }
            ErrorKind::Retryable => {
                if self.attempt >= self.policy.max_retries {
                    return Err(RetryError::TimeoutExceeded("max_retries reached".into()));
                }
                let delay = self.backoff_delay(self.attempt);
                if self.cumulative_wait_s + delay.as_secs_f64() > self.policy.retry_budget_s {
                    return Err(RetryError::TimeoutExceeded("retry_budget_s exceeded".into()));
                }
                self.cumulative_wait_s += delay.as_secs_f64();
                self.attempt += 1;
                Ok(NextStep::RetryAfter(delay))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_never_retry() {
        let mut engine = RetryEngine::new(RetryPolicy::default());
        let err = engine.next_step(&ErrorKind::Fatal, None).unwrap_err();
        assert!(matches!(err, RetryError::Fatal(_)));
    }

    #[test]
    fn auth_errors_never_retry() {
        let mut engine = RetryEngine::new(RetryPolicy::default());
        let err = engine.next_step(&ErrorKind::Auth, None).unwrap_err();
        assert!(matches!(err, RetryError::Fatal(_)));
        assert_eq!(engine.attempts_made(), 0);
    }

    #[test]
    fn stops_after_max_retries() {
        let mut engine = RetryEngine::new(RetryPolicy { max_retries: 2, ..Default::default() });
        assert!(matches!(engine.next_step(&ErrorKind::Retryable, None), Ok(NextStep::RetryAfter(_))));
        assert!(matches!(engine.next_step(&ErrorKind::Retryable, None), Ok(NextStep::RetryAfter(_))));
        let err = engine.next_step(&ErrorKind::Retryable, None).unwrap_err();
        assert!(matches!(err, RetryError::TimeoutExceeded(_)));
        assert_eq!(engine.attempts_made(), 2);
    }

    #[test]
    fn rate_limit_without_wait_flag_surfaces_immediately() {
        let mut engine = RetryEngine::new(RetryPolicy { wait_on_rate_limit: false, ..Default::default() });
        let err = engine
            .next_step(&ErrorKind::RateLimited { wait_hint_s: Some(5.0) }, None)
            .unwrap_err();
        assert!(matches!(err, RetryError::Fatal(_)));
    }

    #[test]
    fn rate_limit_wait_ceiling_raises_timeout() {
        let mut engine = RetryEngine::new(RetryPolicy {
            wait_on_rate_limit: true,
            max_wait_timeout_s: 5.0,
            ..Default::default()
        });
        let err = engine
            .next_step(&ErrorKind::RateLimited { wait_hint_s: Some(10.0) }, None)
            .unwrap_err();
        assert!(matches!(err, RetryError::TimeoutExceeded(_)));
    }
}
