//! Wall-clock source for poll deadlines and ban windows.
//!
//! Services never read the system time directly; they ask the `Clock` held
//! in `AppState`. Tests swap in `ManualClock` to move time forward without
//! sleeping.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return 0;
        };
        i64::try_from(dur.as_millis()).unwrap_or(0)
    }
}

#[cfg(test)]
pub use manual::ManualClock;
