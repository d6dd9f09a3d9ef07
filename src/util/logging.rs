//! # Log Rate Limiting
//!
//! A P1 port that goes quiet produces one read failure every timeout
//! period, forever. These throttles keep such repeated warnings from
//! flooding the log while still recording that they happen.
//!
//! ```rust
//! use p1_rs::util::logging::LogThrottle;
//!
//! // Allow 5 messages per minute
//! let mut throttle = LogThrottle::new(60_000, 5);
//! if throttle.allow() {
//!     log::warn!("Unable to read from /dev/ttyUSB0");
//! }
//! ```

use std::collections::HashMap;
use tokio::time::Instant;

/// Throttling structure for rate-limiting log messages.
///
/// Uses the tokio clock so that throttled code behaves the same under a
/// paused test runtime.
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages suppressed since the last allowed one
    suppressed: u32,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count += 1;
        if self.count <= self.cap {
            true
        } else {
            self.suppressed += 1;
            false
        }
    }

    /// Number of messages suppressed since the last call, resetting the
    /// counter. Lets the caller mention them once logging is allowed again.
    pub fn take_suppressed(&mut self) -> u32 {
        std::mem::take(&mut self.suppressed)
    }
}

/// Throttles keyed by message category, so that read errors and skipped
/// telegrams are limited independently.
#[derive(Debug, Default)]
pub struct ThrottleManager {
    throttles: HashMap<String, LogThrottle>,
}

impl ThrottleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if logging is allowed for a specific category
    pub fn allow(&mut self, category: &str, window_ms: u64, cap: u32) -> bool {
        self.throttles
            .entry(category.to_string())
            .or_insert_with(|| LogThrottle::new(window_ms, cap))
            .allow()
    }

    /// Suppressed count for `category`, reset on read.
    pub fn take_suppressed(&mut self, category: &str) -> u32 {
        self.throttles
            .get_mut(category)
            .map(LogThrottle::take_suppressed)
            .unwrap_or(0)
    }
}
