//! Logging utilities
//!
//! - `LogThrottle` - interval based suppression of repeated warnings
//! - `KeyedLogThrottle` - log-once-per-key reporting (missing metrics)

pub mod throttle;

pub use throttle::{KeyedLogThrottle, LogThrottle};
