//! Rate limit counter records and limits.

use std::time::{Duration, Instant};

use crate::error::{Result, TurnstileError};

/// Longest window or idle threshold accepted anywhere in the crate (one year).
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Maximum requests allowed per fixed window.
///
/// Always valid once constructed: `max > 0` and a window in `(0, MAX_WINDOW]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    max: u64,
    window: Duration,
}

impl Limit {
    /// Create a new limit, rejecting a zero maximum and a window that is zero
    /// or longer than [`MAX_WINDOW`].
    pub fn new(max: u64, window: Duration) -> Result<Self> {
        if max == 0 {
            return Err(TurnstileError::Config(
                "rate limit max must be greater than 0".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TurnstileError::Config(
                "rate limit window must be greater than 0".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(TurnstileError::Config(format!(
                "rate limit window must be at most {}s, got {}s",
                MAX_WINDOW.as_secs(),
                window.as_secs()
            )));
        }
        Ok(Self { max, window })
    }

    /// Get the maximum number of requests per window.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Outcome of recording one hit against a [`CounterRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The hit landed inside the current window.
    Incremented,
    /// The previous window had elapsed; a new one started at this hit.
    RolledOver,
}

/// Per-key state of a fixed-window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    /// Requests observed in the current window
    count: u64,
    /// When the current window started
    window_start: Instant,
    /// Length of every window for this record
    window: Duration,
}

impl CounterRecord {
    /// Create an empty record whose window starts at `now`.
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window,
        }
    }

    /// Record one request at `now`.
    ///
    /// Once `now` reaches the end of the window the record restarts at
    /// `count = 1` with a window beginning at `now`; it never keeps
    /// accumulating across a boundary.
    pub fn hit(&mut self, now: Instant) -> Transition {
        if self.is_expired(now) {
            self.count = 1;
            self.window_start = now;
            Transition::RolledOver
        } else {
            self.count = self.count.saturating_add(1);
            Transition::Incremented
        }
    }

    /// Get the request count for the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get when the current window started.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the instant at which the current window ends.
    pub fn reset_at(&self) -> Instant {
        self.window_start + self.window
    }

    /// Whether the current window has ended at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at()
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        self.reset_at().saturating_duration_since(now)
    }
}
