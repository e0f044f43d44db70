//! Rate-limited logging utilities.
//!
//! Provides `LogThrottle` to prevent log storms while still tracking suppressed messages,
//! and `KeyedLogThrottle` for "log once per key until it recovers" reporting.

use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A lightweight rate limiter for logging to prevent log storms.
#[derive(Debug)]
pub struct LogThrottle {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// Checks if a log should be emitted.
    /// Returns true if the interval has passed since the last log.
    /// If false, increments the suppressed counter.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log_time {
            Some(last) => {
                if now.duration_since(last) >= self.interval {
                    self.last_log_time = Some(now);
                    true
                } else {
                    self.suppressed_count += 1;
                    false
                }
            }
            None => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Returns the number of suppressed logs since the last successful log, and resets the counter.
    pub fn get_and_reset_suppressed_count(&mut self) -> u64 {
        let count = self.suppressed_count;
        self.suppressed_count = 0;
        count
    }
}

/// Logs a condition once per key until that key is cleared.
///
/// Used for missing metrics: the first failed lookup is logged, repeats are
/// suppressed, and once the metric comes back the key is cleared so a later
/// outage gets logged again.
#[derive(Debug, Default)]
pub struct KeyedLogThrottle {
    reported: HashSet<String>,
    suppressed_count: u64,
}

impl KeyedLogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `key` is seen since it was last cleared.
    pub fn should_log(&mut self, key: &str) -> bool {
        if self.reported.contains(key) {
            self.suppressed_count += 1;
            false
        } else {
            self.reported.insert(key.to_string());
            true
        }
    }

    /// Forget `key`. Returns true if it had been reported.
    pub fn clear(&mut self, key: &str) -> bool {
        self.reported.remove(key)
    }

    pub fn is_reported(&self, key: &str) -> bool {
        self.reported.contains(key)
    }

    pub fn get_and_reset_suppressed_count(&mut self) -> u64 {
        let count = self.suppressed_count;
        self.suppressed_count = 0;
        count
    }
}
