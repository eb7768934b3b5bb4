//! Fixed-window counters behind the admission gate.

use crate::error::RateWindow;

/// Request counter for one window. Windows are aligned to the epoch, so a
/// minute bucket refills exactly at `:00`, and refills to full capacity
/// rather than leaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowBucket {
    window: RateWindow,
    window_start: u64,
    used: u32,
}

impl FixedWindowBucket {
    pub fn new(window: RateWindow, now: u64) -> Self {
        Self {
            window,
            window_start: Self::align(window, now),
            used: 0,
        }
    }

    fn align(window: RateWindow, now: u64) -> u64 {
        now - now % window.seconds()
    }

    pub fn window(&self) -> RateWindow {
        self.window
    }

    /// Start a fresh window if `now` has crossed the boundary.
    pub fn refresh(&mut self, now: u64) {
        let start = Self::align(self.window, now);
        if start != self.window_start {
            self.window_start = start;
            self.used = 0;
        }
    }

    pub fn has_capacity(&self, capacity: u32) -> bool {
        self.used < capacity
    }

    pub fn consume(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Seconds until the current window closes (at least 1).
    pub fn retry_after(&self, now: u64) -> u64 {
        (self.window_start + self.window.seconds())
            .saturating_sub(now)
            .max(1)
    }
}

/// Tokens and requests charged to a client in the current day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyUsage {
    day_start: u64,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl DailyUsage {
    pub fn new(now: u64) -> Self {
        Self {
            day_start: FixedWindowBucket::align(RateWindow::Day, now),
            requests: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn refresh(&mut self, now: u64) {
        let start = FixedWindowBucket::align(RateWindow::Day, now);
        if start != self.day_start {
            *self = Self::new(now);
        }
    }
}
