//! Time abstraction so scheduling and retry math can be tested without sleeping.

use chrono::{DateTime, Utc};

/// Supplies the current wall-clock time.
///
/// The engine never calls `Utc::now()` directly outside of a `Clock`
/// implementation, so tests can substitute a fixed or steppable clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::Clock;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    /// A clock that only advances when told to. Useful for retry/backoff tests.
    pub struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut now = self.now.lock();
            *now += delta;
        }

        pub fn set(&self, at: DateTime<Utc>) {
            *self.now.lock() = at;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}
