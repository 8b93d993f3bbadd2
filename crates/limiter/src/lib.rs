//! Sliding-window rate limiter keyed by `(provider, model)` (§4.5).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use llmgate_core::Limits;
use thiserror::Error;

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("rate limit exhausted for {provider}/{model}: {reason}")]
    Exhausted { provider: String, model: String, reason: String },
}

/// Outcome of `reserve` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReserveOutcome {
    Ready,
    WaitHint(f64),
    Exhausted,
}

struct Window {
    /// `(instant, weight)` pairs, oldest first.
    entries: VecDeque<(Instant, u64)>,
    span: Duration,
    cap: u64,
}

impl Window {
    fn new(span: Duration, cap: u64) -> Self {
        Self { entries: VecDeque::new(), span, cap }
    }

    fn prune(&mut self, now: Instant) {
        while let Some((t, _)) = self.entries.front() {
            if now.duration_since(*t) > self.span {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn sum(&self) -> u64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    fn wait_hint(&self, now: Instant) -> Option<f64> {
        self.entries.front().map(|(t, _)| {
            let elapsed = now.duration_since(*t);
            (self.span.saturating_sub(elapsed)).as_secs_f64()
        })
    }
}

struct ModelWindows {
    rpm: Window,
    tpm: Window,
    rpd: Window,
}

/// One shard per `(provider, model)` key; `DashMap` gives per-key granular
/// locking, matching the concurrency guarantee of §5 ("fine-grained locks
/// keyed by (provider, model)").
pub struct RateLimiter {
    windows: DashMap<(String, String), ModelWindows>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { windows: DashMap::new() }
    }

    fn entry(&self, provider: &str, model: &str, limits: Limits) -> dashmap::mapref::one::RefMut<'_, (String, String), ModelWindows> {
        self.windows
            .entry((provider.to_string(), model.to_string()))
            .or_insert_with(|| ModelWindows {
                rpm: Window::new(MINUTE, limits.rpm as u64),
                tpm: Window::new(MINUTE, limits.tpm as u64),
                rpd: Window::new(Duration::from_secs(86_400), limits.rpd as u64),
            })
    }

    /// `reserve(model, estimated_tokens) -> Ready | WaitHint(seconds) | Exhausted`.
    pub fn reserve(&self, provider: &str, model: &str, limits: Limits, estimated_tokens: u64) -> ReserveOutcome {
        let now = Instant::now();
        let mut windows = self.entry(provider, model, limits);

        windows.rpm.prune(now);
        windows.tpm.prune(now);
        windows.rpd.prune(now);

        if limits.rpm == 0 || limits.rpd == 0 {
            return ReserveOutcome::Exhausted;
        }

        let mut hints = Vec::new();
        if windows.rpm.sum() + 1 > windows.rpm.cap {
            if let Some(hint) = windows.rpm.wait_hint(now) {
                hints.push(hint);
            } else {
                return ReserveOutcome::Exhausted;
            }
        }
        if windows.tpm.cap > 0 && windows.tpm.sum() + estimated_tokens > windows.tpm.cap {
            if let Some(hint) = windows.tpm.wait_hint(now) {
                hints.push(hint);
            } else {
                return ReserveOutcome::Exhausted;
            }
        }
        if windows.rpd.sum() + 1 > windows.rpd.cap {
            return ReserveOutcome::Exhausted;
        }

        if let Some(max_hint) = hints.into_iter().fold(None, |acc: Option<f64>, h| {
            Some(acc.map_or(h, |a| a.max(h)))
        }) {
            return ReserveOutcome::WaitHint(max_hint);
        }

        windows.rpm.entries.push_back((now, 1));
        windows.tpm.entries.push_back((now, estimated_tokens));
        windows.rpd.entries.push_back((now, 1));
        ReserveOutcome::Ready
    }

    /// Finalises a reservation with the real token usage, replacing the
    /// estimate recorded at `reserve` time with the committed figure.
    pub fn commit(&self, provider: &str, model: &str, limits: Limits, actual_tokens: u64) {
        let now = Instant::now();
        let mut windows = self.entry(provider, model, limits);
        windows.tpm.prune(now);
        if let Some(last) = windows.tpm.entries.back_mut() {
            last.1 = actual_tokens;
        } else {
            windows.tpm.entries.push_back((now, actual_tokens));
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rpm: u32, tpm: u32, rpd: u32) -> Limits {
        Limits { rpm, tpm, rpd }
    }

    #[test]
    fn rpm_zero_is_exhausted_immediately() {
        let limiter = RateLimiter::new();
        let outcome = limiter.reserve("acme", "m1", limits(0, 1000, 100), 10);
        assert_eq!(outcome, ReserveOutcome::Exhausted);
    }

    #[test]
    fn allows_up_to_rpm_then_waits() {
        let limiter = RateLimiter::new();
        let l = limits(2, 100_000, 1000);
        assert_eq!(limiter.reserve("acme", "m1", l, 10), ReserveOutcome::Ready);
        assert_eq!(limiter.reserve("acme", "m1", l, 10), ReserveOutcome::Ready);
        match limiter.reserve("acme", "m1", l, 10) {
            ReserveOutcome::WaitHint(h) => assert!(h > 0.0),
            other => panic!("expected WaitHint, got {:?}", other),
        }
    }

    #[test]
    fn tpm_cap_is_respected() {
        let limiter = RateLimiter::new();
        let l = limits(1000, 50, 1000);
        assert_eq!(limiter.reserve("acme", "m1", l, 40), ReserveOutcome::Ready);
        match limiter.reserve("acme", "m1", l, 40) {
            ReserveOutcome::WaitHint(_) => {}
            other => panic!("expected WaitHint, got {:?}", other),
        }
    }

    #[test]
    fn keys_are_independent_per_model() {
        let limiter = RateLimiter::new();
        let l = limits(1, 1000, 1000);
        assert_eq!(limiter.reserve("acme", "m1", l, 1), ReserveOutcome::Ready);
        assert_eq!(limiter.reserve("acme", "m2", l, 1), ReserveOutcome::Ready);
    }
}
