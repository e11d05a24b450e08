use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid timing offset {0:?}; expected SS.mmm below 120.000")]
    InvalidOffset(String),

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("trigger {name:?} has invalid time {value:?}; expected HH:MM:SS")]
    InvalidTime { name: String, value: String },

    #[error("invalid trigger list: {0}")]
    InvalidTriggers(String),
}
