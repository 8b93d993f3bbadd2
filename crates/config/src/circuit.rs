use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug)]
struct EndpointState {
    state: State,
    failures: u32,
    last_failure: Instant,
    open_since: Instant,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Endpoint-skip hints for the Model Registry & Endpoint Selector (§4.2, §9).
///
/// This is deliberately scoped to what §4.2 needs — skip endpoints currently
/// open, probe the oldest-opened one when all are open — not a general SRE
/// circuit breaker.
pub struct CircuitRegistry {
    states: DashMap<String, EndpointState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    window: Duration,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            window: Duration::from_secs(30),
        }
    }

    pub fn with_thresholds(mut self, failures: u32, reset: Duration, window: Duration) -> Self {
        self.failure_threshold = failures;
        self.reset_timeout = reset;
        self.window = window;
        self
    }

    /// True if `endpoint` should be skipped by the selector right now.
    pub fn is_open(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        match self.states.get(endpoint).map(|s| s.state.clone()) {
            None | Some(State::Closed) => false,
            Some(State::Open) => {
                if let Some(mut entry) = self.states.get_mut(endpoint) {
                    if entry.open_until.map(|until| now >= until).unwrap_or(false) {
                        entry.state = State::HalfOpen;
                        entry.probe_in_flight = true;
                        tracing::info!(endpoint, "endpoint circuit half-open, sending probe");
                        return false;
                    }
                }
                true
            }
            Some(State::HalfOpen) => {
                self.states.get(endpoint).map(|e| e.probe_in_flight).unwrap_or(false)
            }
        }
    }

    /// Among currently-open endpoints, the one that has been open longest —
    /// tried as a probe per §4.2 ("if all are skipped, the oldest-opened one
    /// is tried as a probe").
    pub fn oldest_open<'a>(&self, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
        candidates
            .filter(|name| self.is_open(name))
            .min_by_key(|name| {
                self.states.get(*name).map(|e| e.open_since).unwrap_or_else(Instant::now)
            })
    }

    pub fn report_failure(&self, endpoint: &str) {
        let now = Instant::now();
        let mut entry = self.states.entry(endpoint.to_string()).or_insert(EndpointState {
            state: State::Closed,
            failures: 0,
            last_failure: now,
            open_since: now,
            open_until: None,
            probe_in_flight: false,
        });

        match entry.state {
            State::HalfOpen => {
                entry.state = State::Open;
                entry.open_since = now;
                entry.open_until = Some(now + self.reset_timeout);
                entry.probe_in_flight = false;
                tracing::warn!(endpoint, "probe failed, endpoint circuit re-opened");
            }
            State::Open => {
                entry.open_until = Some(now + self.reset_timeout);
            }
            State::Closed => {
                if entry.last_failure.elapsed() > self.window {
                    entry.failures = 0;
                }
                entry.failures += 1;
                entry.last_failure = now;
                if entry.failures >= self.failure_threshold {
                    entry.state = State::Open;
                    entry.open_since = now;
                    entry.open_until = Some(now + self.reset_timeout);
                    tracing::warn!(endpoint, "endpoint circuit opened");
                }
            }
        }
    }

    pub fn report_success(&self, endpoint: &str) {
        if let Some(mut entry) = self.states.get_mut(endpoint) {
            entry.state = State::Closed;
            entry.failures = 0;
            entry.open_until = None;
            entry.probe_in_flight = false;
        }
    }

    pub fn count_open(&self) -> usize {
        self.states.iter().filter(|e| e.state != State::Closed).count()
    }

    pub fn total_endpoints(&self) -> usize {
        self.states.len()
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
