//! Sliding-window limiter over successful submissions

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    log: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            log: VecDeque::new(),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn in_window(&self, now: Instant) -> impl Iterator<Item = &Instant> {
        let window = self.window;
        self.log
            .iter()
            .filter(move |ts| now.saturating_duration_since(**ts) < window)
    }

    /// Requests recorded strictly inside `(now - window, now]`
    pub fn recent(&self, now: Instant) -> usize {
        self.in_window(now).count()
    }

    pub fn is_limited(&self, now: Instant) -> bool {
        self.recent(now) >= self.max_requests
    }

    pub fn remaining(&self, now: Instant) -> usize {
        self.max_requests.saturating_sub(self.recent(now))
    }

    /// Time until the oldest in-window request leaves the window, if limited
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        if !self.is_limited(now) {
            return None;
        }
        let recent: Vec<&Instant> = self.in_window(now).collect();
        let oldest_needed = recent.len() + 1 - self.max_requests;
        recent
            .get(oldest_needed - 1)
            .map(|ts| self.window.saturating_sub(now.saturating_duration_since(**ts)))
    }

    /// Record a successful submission
    pub fn record(&mut self, now: Instant) {
        while let Some(oldest) = self.log.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.log.pop_front();
            } else {
                break;
            }
        }
        self.log.push_back(now);
    }
}
