//! Call-rate limiter shared by every generation call in a run.
//!
//! Sliding-window accounting: a slot is held while a call is in flight and
//! for one full window after it completes. At every instant
//! `in_flight + completed_within_window <= capacity`, so no window of that
//! length can ever contain more than `capacity` completed calls, however
//! the calls interleave.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

pub const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    state: Mutex<WindowState>,
    released: Notify,
}

#[derive(Debug, Default)]
struct WindowState {
    in_flight: usize,
    completions: VecDeque<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.completions.front() {
            if now.duration_since(oldest) >= window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter {
    /// `rpm` calls per rolling minute. Zero is treated as one.
    pub fn per_minute(rpm: u32) -> Self {
        Self::with_window(rpm.max(1) as usize, MINUTE)
    }

    pub fn with_window(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            state: Mutex::new(WindowState::default()),
            released: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // Poisoning only means a holder panicked between two plain field
        // updates; the counters are still coherent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until a call may start. Never fails; suspends instead.
    pub async fn acquire(self: &Arc<Self>) -> Permit {
        loop {
            let released = self.released.notified();
            let wake_at = {
                let mut state = self.lock();
                let now = Instant::now();
                state.prune(now, self.window);
                if state.in_flight + state.completions.len() < self.capacity {
                    state.in_flight += 1;
                    return Permit {
                        limiter: Arc::clone(self),
                    };
                }
                state.completions.front().map(|oldest| *oldest + self.window)
            };

            debug!(capacity = self.capacity, "Rate limit reached, waiting");
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = released => {}
                    }
                }
                // Every slot is held by an in-flight call.
                None => released.await,
            }
        }
    }

    fn release(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.completions.push_back(Instant::now());
        }
        self.released.notify_waiters();
    }
}

/// Held for the duration of one call; records the completion on drop.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<RateLimiter>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
