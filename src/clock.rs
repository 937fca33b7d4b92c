//! Time source used by the lifecycle engine and the fraud gate.

use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

/// Abstracted so expiry and rate windows can be driven deterministically.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualTimeSource {
    time: Mutex<OffsetDateTime>,
}

impl ManualTimeSource {
    pub fn new(initial: OffsetDateTime) -> Self {
        Self {
            time: Mutex::new(initial),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap_or_else(|e| e.into_inner());
        *time += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.time.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> OffsetDateTime {
        *self.time.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_time_source_advances() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let clock = ManualTimeSource::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
