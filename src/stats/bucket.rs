//! 时间分桶：本地日期、小时、ISO 星期和单双日桶

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub date: NaiveDate,
    pub hour: i32,
    /// 周一 = 1 … 周日 = 7
    pub weekday: i32,
    /// epoch_day % 2，选择当前生效的去重集合
    pub parity: u8,
}

impl TimeBucket {
    pub fn resolve(time: DateTime<Utc>, utc_offset_secs: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_secs).unwrap_or_else(|| {
            warn!("Invalid utc offset {}s, falling back to UTC", utc_offset_secs);
            Utc.fix()
        });
        let local = time.with_timezone(&offset);
        let date = local.date_naive();

        Self {
            date,
            hour: local.hour() as i32,
            weekday: local.weekday().number_from_monday() as i32,
            parity: epoch_day(date).rem_euclid(2) as u8,
        }
    }
}

fn epoch_day(date: NaiveDate) -> i64 {
    date.signed_duration_since(NaiveDate::default()).num_days()
}
