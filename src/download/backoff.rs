use std::time::Duration;

/// Delay before the next snapshot poll. Doubles on every failed fetch up to
/// `max`, drops back to `initial` after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_success(&mut self) -> Duration {
        self.current = self.initial;
        self.current
    }

    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(15_000), Duration::from_millis(120_000))
    }
}
