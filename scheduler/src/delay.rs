//! Sub-second wall-clock alignment.
//!
//! A [`TimingOffset`] names an instant inside the current minute, e.g.
//! `59.780`. Offsets at or past `60.000` reach into the next minute and only
//! wait when the caller is already in the last second of the minute or in the
//! first part of the next one. Anything else that has already passed returns
//! immediately: being late by a little must never stall a whole minute.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::ScheduleError;

const MINUTE_MS: u32 = 60_000;
const MAX_OFFSET_MS: u32 = 2 * MINUTE_MS;
/// Window before the minute boundary in which a next-minute offset still waits.
const LAST_SECOND_MS: u32 = 59_000;

/// Target position within a minute, in milliseconds from the minute start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimingOffset {
    millis: u32,
}

impl TimingOffset {
    pub fn new(second: u32, millisecond: u32) -> Result<Self, ScheduleError> {
        if millisecond >= 1000 {
            return Err(ScheduleError::InvalidOffset(format!("{second}.{millisecond}")));
        }
        Self::from_millis(second.saturating_mul(1000).saturating_add(millisecond))
    }

    pub fn from_millis(millis: u32) -> Result<Self, ScheduleError> {
        if millis >= MAX_OFFSET_MS {
            return Err(ScheduleError::InvalidOffset(millis.to_string()));
        }
        Ok(Self { millis })
    }

    pub fn as_millis(&self) -> u32 {
        self.millis
    }

    pub fn crosses_minute(&self) -> bool {
        self.millis >= MINUTE_MS
    }
}

impl FromStr for TimingOffset {
    type Err = ScheduleError;

    /// Parses `SS`, `SS.m`, `SS.mm` or `SS.mmm`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidOffset(s.to_string());
        let (secs, frac) = s.trim().split_once('.').unwrap_or((s.trim(), ""));

        if secs.is_empty() || frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let second: u32 = secs.parse().map_err(|_| invalid())?;
        let millisecond = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<3}").parse::<u32>().map_err(|_| invalid())?
        };

        Self::new(second, millisecond).map_err(|_| invalid())
    }
}

impl fmt::Display for TimingOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{:03}", self.millis / 1000, self.millis % 1000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Slept until the target instant.
    Waited(Duration),
    /// Target already passed for this minute; returned at once.
    AlreadyPassed,
}

/// Milliseconds to wait from `within_minute_ms` until `offset`, or `None` when
/// the target has already passed.
pub fn remaining_ms(within_minute_ms: u32, offset: TimingOffset) -> Option<u32> {
    let target = offset.as_millis();

    if !offset.crosses_minute() {
        return (within_minute_ms < target).then(|| target - within_minute_ms);
    }

    let wrapped = target - MINUTE_MS;
    if within_minute_ms < wrapped {
        Some(wrapped - within_minute_ms)
    } else if within_minute_ms >= LAST_SECOND_MS {
        Some(target - within_minute_ms)
    } else {
        None
    }
}

/// Position of `now` within its minute in `tz`, in milliseconds.
pub fn within_minute_ms(now: DateTime<Utc>, tz: Tz) -> u32 {
    let local = now.with_timezone(&tz);
    // leap seconds report nanos >= 1e9
    let millis = (local.nanosecond() / 1_000_000).min(999);
    local.second().min(59) * 1000 + millis
}

/// Suspends callers until a [`TimingOffset`] in a fixed timezone.
pub struct DelayCoordinator<C: Clock> {
    clock: Arc<C>,
    tz: Tz,
}

impl<C: Clock> DelayCoordinator<C> {
    pub fn new(clock: Arc<C>, tz: Tz) -> Self {
        Self { clock, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    /// Waits for the next occurrence of `offset` in the current minute.
    pub async fn await_offset(&self, offset: TimingOffset) -> WaitOutcome {
        let now = self.clock.now();
        let within = within_minute_ms(now, self.tz);

        let Some(remaining) = remaining_ms(within, offset) else {
            debug!(%offset, within_ms = within, "target already passed; continuing");
            return WaitOutcome::AlreadyPassed;
        };

        let deadline = now + TimeDelta::milliseconds(i64::from(remaining));
        info!(%offset, wait_ms = remaining, "waiting for target offset");

        sleep_until_wall(self.clock.as_ref(), deadline).await;

        let waited = (self.clock.now() - now).to_std().unwrap_or_default();
        WaitOutcome::Waited(waited)
    }
}

/// Sleeps until `deadline`, re-reading `clock` after every wake-up.
pub async fn sleep_until_wall<C: Clock + ?Sized>(clock: &C, deadline: DateTime<Utc>) {
    loop {
        let remaining = deadline - clock.now();
        match remaining.to_std() {
            Ok(d) if !d.is_zero() => tokio::time::sleep(d).await,
            _ => return,
        }
    }
}
