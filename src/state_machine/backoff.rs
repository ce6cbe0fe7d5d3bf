use std::time::Duration;

/// Growth applied to the poll interval after every non-terminal check.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound on the wait between two status checks.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Multiplicative poll backoff, private to one job's poll loop.
///
/// Each call to [`next_delay`](PollBackoff::next_delay) yields the current
/// interval and then grows it by [`BACKOFF_FACTOR`], capped at
/// [`MAX_POLL_INTERVAL`].
#[derive(Debug, Clone)]
pub struct PollBackoff {
    current: Duration,
    max: Duration,
}

impl PollBackoff {
    pub fn new(initial: Duration) -> Self {
        Self {
            current: initial.min(MAX_POLL_INTERVAL),
            max: MAX_POLL_INTERVAL,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * BACKOFF_FACTOR)
            .unwrap_or(self.max);
        // Sub-nanosecond growth would otherwise round back to `delay`.
        self.current = grown.max(delay + Duration::from_nanos(1)).min(self.max);
        delay
    }
}

impl Iterator for PollBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}
