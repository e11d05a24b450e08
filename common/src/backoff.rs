use rand::Rng;
use std::time::{Duration, Instant};

/// Reconnect pacing for the long-lived WebSocket streams.
///
/// Delays double from `floor` up to `ceiling`. Half of each delay is fixed and
/// the other half is randomised so that both streams never redial in lockstep.
/// A connection only counts as healthy once it has stayed up for `ceiling`;
/// a socket that flaps right after the handshake keeps backing off.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    floor: Duration,
    ceiling: Duration,
    jitter: bool,
    failures: u32,
    connected_at: Option<Instant>,
}

impl ReconnectBackoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            jitter: true,
            failures: 0,
            connected_at: None,
        }
    }

    /// Quotes feed the entry decision at the trigger, so redial quickly.
    pub fn market_stream() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(5))
    }

    /// Account updates are only needed around funding settlement.
    pub fn user_stream() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Disables the random half; delays become exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Call once the socket handshake succeeds.
    pub fn connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    /// Delay before the next dial. Call after every failed or dropped connection.
    pub fn next_delay(&mut self) -> Duration {
        if let Some(since) = self.connected_at.take() {
            self.settle(since.elapsed());
        }

        let full = self.capped(self.failures);
        self.failures = self.failures.saturating_add(1);

        if !self.jitter || full.is_zero() {
            return full;
        }
        let half = full / 2;
        let spread = (full - half).as_millis() as u64;
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn settle(&mut self, uptime: Duration) {
        if uptime >= self.ceiling {
            self.failures = 0;
        }
    }

    fn capped(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.floor.saturating_mul(factor).min(self.ceiling)
    }
}
