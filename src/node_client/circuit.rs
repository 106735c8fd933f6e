//! Hand-rolled circuit breaker (closed/open/half-open), matching the
//! teacher's preference for explicit concurrency primitives over a crate.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    reset_timeout: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(State::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold,
            reset_timeout,
            opened_at: Mutex::new(None),
        }
    }

    fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }

    /// Returns true if a call is permitted right now. Transitions Open ->
    /// HalfOpen once `reset_timeout` has elapsed, admitting exactly one
    /// probe request.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => {
                let mut opened_at = self.opened_at.lock().unwrap();
                if let Some(t) = *opened_at {
                    if t.elapsed() >= self.reset_timeout {
                        self.state.store(State::HalfOpen as u8, Ordering::SeqCst);
                        *opened_at = None;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(State::Closed as u8, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state() == State::HalfOpen || failures >= self.failure_threshold {
            self.state.store(State::Open as u8, Ordering::SeqCst);
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }
}
