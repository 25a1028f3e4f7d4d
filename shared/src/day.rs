use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::block::Timestamp;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Calendar days of a fixed reference timezone, so snapshots taken on
/// different networks line up on the same wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    tz: Tz,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl Calendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn midnight(&self, date: NaiveDate) -> Timestamp {
        let local = date.and_time(NaiveTime::MIN);
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&local))
            .timestamp()
    }

    /// Unix timestamps of local midnight at the start of `date` and at the
    /// start of the following day. The second one is the snapshot instant.
    pub fn window(&self, date: NaiveDate) -> (Timestamp, Timestamp) {
        let next = date.succ_opt().unwrap_or(date);
        (self.midnight(date), self.midnight(next))
    }

    /// Local calendar date containing `timestamp`.
    pub fn date_of(&self, timestamp: Timestamp) -> Option<NaiveDate> {
        DateTime::from_timestamp(timestamp, 0)
            .map(|utc| utc.with_timezone(&self.tz).date_naive())
    }
}

/// Every date from `start` to `end`, both included.
pub fn iterate_dates(
    start: NaiveDate,
    end: NaiveDate,
) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |date| *date <= end)
}
