//! Monotonic time source for bounded waits

use std::time::Instant;

/// A monotonic clock. Deadlines are computed against `now()` so waits can be
/// driven by a fake clock in tests.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// The real monotonic clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
