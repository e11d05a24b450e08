use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Source of wall-clock time for timing decisions.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock pinned to `start` and advanced by tokio's clock.
///
/// Under a paused runtime this moves only when timers fire, which makes
/// sub-second waits reproducible in tests.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    start_wall: DateTime<Utc>,
    start_instant: Instant,
}

impl AnchoredClock {
    pub fn new(start_wall: DateTime<Utc>) -> Self {
        Self {
            start_wall,
            start_instant: Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.start_instant.elapsed()).unwrap_or_default();
        self.start_wall + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_paused_time() {
        let start = DateTime::parse_from_rfc3339("2025-01-01T00:00:59.900Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = AnchoredClock::new(start);

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(clock.now() - start, TimeDelta::milliseconds(350));
    }
}
