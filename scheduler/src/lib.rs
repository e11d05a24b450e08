pub mod clock;
pub mod delay;
pub mod error;
pub mod trigger;

pub use clock::{AnchoredClock, Clock, SystemClock};
pub use delay::{DelayCoordinator, TimingOffset, WaitOutcome};
pub use error::ScheduleError;
pub use trigger::{DailyTrigger, TriggerSchedule, parse_triggers};
