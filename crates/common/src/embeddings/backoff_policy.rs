use backoff::backoff::Backoff;
use std::time::Duration;

/// Linear backoff over a fixed number of total attempts.
///
/// The wait before attempt `n + 1` is `delay * n`; after `max_attempts`
/// failed attempts no further wait is produced and the caller gives up.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    delay: Duration,
    max_attempts: u32,
    failures: u32,
}

impl LinearBackoff {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(self.delay * self.failures)
    }
}
