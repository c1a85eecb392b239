//! Daily schedule with a persisted last-run watermark

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Fires once per day at `hour_utc:00`
///
/// A run is due when the latest slot at or before `now` has not been covered
/// by the last recorded run, so a slot missed while the process was down is
/// picked up on the next check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub hour_utc: u32,
}

impl DailySchedule {
    pub fn new(hour_utc: u32) -> Self {
        Self { hour_utc }
    }

    /// Most recent slot at or before `now`
    pub fn last_slot(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = NaiveTime::from_hms_opt(self.hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(at));
        if today <= now {
            today
        } else {
            today - Duration::days(1)
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
        match last_run {
            None => true,
            Some(last_run) => last_run < self.last_slot(now),
        }
    }
}
