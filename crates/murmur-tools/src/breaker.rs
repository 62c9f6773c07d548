// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    /// A probe is in flight.  While set, HalfOpen rejects further callers.
    probing: bool,
}

/// Per-tool three-state circuit breaker.
///
/// Closed forwards calls; after `failure_threshold` consecutive failures it
/// opens.  Open rejects for `cool_down`, then the next caller becomes the
/// single HalfOpen probe — concurrent callers keep being rejected until the
/// probe resolves.  Probe success closes the breaker and resets the counter;
/// probe failure re-opens it and restarts the cool-down timer.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cool_down: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                probing: false,
            }),
            failure_threshold,
            cool_down,
        }
    }

    /// Ask permission to execute.  Returns `false` when the breaker is open
    /// (or a HalfOpen probe is already in flight).  A `true` answer in
    /// HalfOpen claims the probe slot: the caller MUST resolve it via
    /// [`on_success`] or [`on_failure`].
    ///
    /// [`on_success`]: CircuitBreaker::on_success
    /// [`on_failure`]: CircuitBreaker::on_failure
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .last_failure_at
                    .map(|at| at.elapsed() > self.cool_down)
                    .unwrap_or(true);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probing = true;
                    debug!("circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probing {
                    false
                } else {
                    inner.probing = true;
                    true
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.probing = false;
        if inner.state != BreakerState::Closed {
            debug!("circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        let failed_probe = inner.state == BreakerState::HalfOpen;
        inner.probing = false;
        if failed_probe || inner.consecutive_failures >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                debug!(
                    failures = inner.consecutive_failures,
                    "circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
