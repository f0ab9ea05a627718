use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetentionError {
    #[error("retention window must be at least one day, got {0}")]
    NonPositive(i64),
    #[error("retention window of {0} days is out of range")]
    OutOfRange(i64),
    #[error("retention window of {window} reaches before the earliest representable time")]
    CutoffOutOfRange { window: Duration },
}

#[derive(Clone, Debug)]
/// The retention policy the cleaner uses to decide which runs are old enough to delete.
pub struct RetentionPolicy {
    /// How long a run is kept after its run date.
    window: Duration,
}

impl RetentionPolicy {
    /// A policy keeping runs for `days` days. The window must be at least one day.
    pub fn from_days(days: i64) -> Result<Self, RetentionError> {
        if days <= 0 {
            return Err(RetentionError::NonPositive(days));
        }
        let window = Duration::try_days(days).ok_or(RetentionError::OutOfRange(days))?;

        Ok(Self { window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The instant before which runs are considered expired, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RetentionError> {
        now.checked_sub_signed(self.window)
            .ok_or(RetentionError::CutoffOutOfRange {
                window: self.window,
            })
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }
}
