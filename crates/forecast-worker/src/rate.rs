//! Sliding-window limiter on job starts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Allows at most `max_starts` job starts per `window`. Bounds load on the
/// relational store when a burst of jobs (or a corpus sweep racing edits)
/// hits the queue.
#[derive(Debug)]
pub struct StartRateLimiter {
    max_starts: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl StartRateLimiter {
    pub fn new(max_starts: usize, window: Duration) -> Self {
        Self {
            max_starts,
            window,
            starts: VecDeque::with_capacity(max_starts),
        }
    }

    /// `None` when a job may start now; otherwise how long to wait until the
    /// oldest start in the window expires.
    pub fn delay_until_allowed(&mut self, now: Instant) -> Option<Duration> {
        while let Some(oldest) = self.starts.front() {
            if now.duration_since(*oldest) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
        if self.starts.len() < self.max_starts {
            return None;
        }
        let oldest = *self.starts.front()?;
        Some(self.window.saturating_sub(now.duration_since(oldest)))
    }

    pub fn record_start(&mut self, now: Instant) {
        self.starts.push_back(now);
    }
}
