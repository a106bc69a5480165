//! Hand-rolled circuit breaker (§4.5, §9 "no need for a full library"):
//! a `Closed|Open|HalfOpen` state machine guarding `GraphQlClient::execute`.
//! No importable crate in the corpus implements this.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, warn};

/// Calls counted before the rolling failure rate is trusted. Below this,
/// a single early failure can't trip the breaker.
const MIN_CALLS_BEFORE_TRIP: usize = 5;
const WINDOW_SIZE: usize = 20;
const FAILURE_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

/// What a caller should do before attempting the call.
pub enum Permit {
    Allowed,
    AllowedAsProbe,
}

impl CircuitBreaker {
    pub fn new(reset_timeout: Duration) -> Self {
        Self {
            reset_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                window: VecDeque::with_capacity(WINDOW_SIZE),
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Call before attempting the downstream request. Returns `None` if the
    /// breaker refuses the call.
    pub async fn try_acquire(&self) -> Option<Permit> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed => Some(Permit::Allowed),
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.reset_timeout && !inner.half_open_probe_in_flight {
                    inner.state = State::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    warn!("circuit breaker half-open: admitting a single probe call");
                    Some(Permit::AllowedAsProbe)
                } else {
                    None
                }
            }
            State::HalfOpen => None, // a probe is already in flight
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        push_result(&mut inner.window, true);
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Closed;
                inner.opened_at = None;
                inner.half_open_probe_in_flight = false;
                inner.window.clear();
                warn!("circuit breaker closed after a successful half-open probe");
            }
            State::Closed => {}
            State::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        push_result(&mut inner.window, false);

        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probe_in_flight = false;
                error!("circuit breaker re-opened: half-open probe failed");
            }
            State::Closed => {
                if inner.window.len() >= MIN_CALLS_BEFORE_TRIP && failure_rate(&inner.window) >= FAILURE_RATE_THRESHOLD {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                    error!("circuit breaker opened: rolling failure rate crossed {:.0}%", FAILURE_RATE_THRESHOLD * 100.0);
                }
            }
            State::Open => {}
        }
    }
}

fn push_result(window: &mut VecDeque<bool>, success: bool) {
    if window.len() == WINDOW_SIZE {
        window.pop_front();
    }
    window.push_back(success);
}

fn failure_rate(window: &VecDeque<bool>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|ok| !**ok).count();
    failures as f64 / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stays_closed_below_the_minimum_call_count() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30));
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn opens_once_failure_rate_crosses_fifty_percent() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30));
        for _ in 0..3 {
            breaker.record_failure().await;
        }
        for _ in 0..2 {
            breaker.record_success().await;
        }
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn open_breaker_refuses_calls_before_the_reset_timeout() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30));
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        assert!(breaker.try_acquire().await.is_none());
    }

    #[tokio::test]
    async fn half_open_probe_closes_the_breaker_on_success() {
        let breaker = CircuitBreaker::new(Duration::from_millis(1));
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(breaker.try_acquire().await, Some(Permit::AllowedAsProbe)));
        breaker.record_success().await;
        assert_eq!(breaker.state().await, State::Closed);
    }
}
