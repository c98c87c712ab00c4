//! Time sources.
//!
//! The core never reads the clock itself; callers pass `now_ms` into each
//! operation. Hosts read one of these clocks once per tick or frame.

use chrono::Utc;

/// Milliseconds since some fixed epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        Utc::now().timestamp_millis() as f64
    }
}
