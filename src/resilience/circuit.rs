//! Keyed circuit breaker.
//!
//! One breaker instance guards one dependency path (model backends, source
//! connectors) and keeps independent state per key, so a failing provider
//! never trips its siblings. After `failure_threshold` consecutive failures
//! the key opens; once `reset_timeout` has elapsed it goes half-open and
//! `half_open_successes` consecutive successes close it again. Any failure
//! while half-open reopens it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::ResilienceConfig;

#[derive(Debug, Clone, Copy)]
pub struct BreakerOptions {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_successes: u32,
}

impl BreakerOptions {
    /// Model path: 5 failures, 60s cooldown.
    pub fn for_models(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.llm_failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.llm_reset_secs),
            half_open_successes: config.half_open_successes.max(1),
        }
    }

    /// Source connector path: 3 failures, 30s cooldown.
    pub fn for_sources(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.source_failure_threshold.max(1),
            reset_timeout: Duration::from_secs(config.source_reset_secs),
            half_open_successes: config.half_open_successes.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct KeyState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_successes: 0,
        }
    }
}

pub struct CircuitBreaker {
    name: &'static str,
    options: BreakerOptions,
    states: Mutex<HashMap<String, KeyState>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, options: BreakerOptions) -> Self {
        Self {
            name,
            options,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Move an open key to half-open once its cooldown has elapsed.
    fn refresh(&self, key: &str, state: &mut KeyState) {
        if state.state != CircuitState::Open {
            return;
        }
        let cooled = state
            .opened_at
            .map(|opened| opened.elapsed() >= self.options.reset_timeout)
            .unwrap_or(true);
        if cooled {
            log::info!(
                "Circuit breaker {}/{} half-open: allowing probe after cooldown",
                self.name,
                key
            );
            state.state = CircuitState::HalfOpen;
            state.half_open_successes = 0;
        }
    }

    /// Whether a call for `key` may proceed right now.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_default();
        self.refresh(key, state);
        state.state != CircuitState::Open
    }

    pub fn record_success(&self, key: &str) {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_default();
        match state.state {
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.options.half_open_successes {
                    log::info!("Circuit breaker {}/{} closed after recovery", self.name, key);
                    *state = KeyState::default();
                }
            }
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, key: &str) {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_default();
        state.consecutive_failures += 1;
        match state.state {
            CircuitState::HalfOpen => {
                log::warn!("Circuit breaker {}/{} reopened: probe failed", self.name, key);
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_successes = 0;
            }
            CircuitState::Closed
                if state.consecutive_failures >= self.options.failure_threshold =>
            {
                log::warn!(
                    "Circuit breaker {}/{} opened after {} consecutive failures",
                    self.name,
                    key,
                    state.consecutive_failures
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        let mut states = self.states.lock();
        match states.get_mut(key) {
            Some(state) => {
                self.refresh(key, state);
                state.state
            }
            None => CircuitState::Closed,
        }
    }

    pub fn reset(&self, key: &str) {
        self.states.lock().remove(key);
    }

    /// Current state of every key seen so far, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut states = self.states.lock();
        let keys: Vec<String> = states.keys().cloned().collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(state) = states.get_mut(&key) {
                self.refresh(&key, state);
                out.push((key, state.state));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(reset_ms: u64) -> BreakerOptions {
        BreakerOptions {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(reset_ms),
            half_open_successes: 2,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("sources", options(60_000));
        breaker.record_failure("mail");
        breaker.record_failure("mail");
        assert!(breaker.try_acquire("mail"));
        breaker.record_failure("mail");
        assert!(!breaker.try_acquire("mail"));
        assert_eq!(breaker.state("mail"), CircuitState::Open);
    }

    #[test]
    fn test_keys_are_independent() {
        let breaker = CircuitBreaker::new("sources", options(60_000));
        for _ in 0..3 {
            breaker.record_failure("mail");
        }
        assert!(!breaker.try_acquire("mail"));
        assert!(breaker.try_acquire("calendar"));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("models", options(60_000));
        breaker.record_failure("advisor");
        breaker.record_failure("advisor");
        breaker.record_success("advisor");
        breaker.record_failure("advisor");
        breaker.record_failure("advisor");
        assert_eq!(breaker.state("advisor"), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let breaker = CircuitBreaker::new("models", options(10));
        for _ in 0..3 {
            breaker.record_failure("analyst");
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.try_acquire("analyst"));
        assert_eq!(breaker.state("analyst"), CircuitState::HalfOpen);

        breaker.record_success("analyst");
        assert_eq!(breaker.state("analyst"), CircuitState::HalfOpen);
        breaker.record_success("analyst");
        assert_eq!(breaker.state("analyst"), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("models", options(10));
        for _ in 0..3 {
            breaker.record_failure("contrarian");
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.try_acquire("contrarian"));
        breaker.record_failure("contrarian");
        assert!(!breaker.try_acquire("contrarian"));
    }
}
