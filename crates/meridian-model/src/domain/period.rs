use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ModelError;

/// Rate-limiting time window.
///
/// Each period knows how to derive its bucket identifier from a wall-clock
/// instant. The bucket is embedded in the counter key, so a window rollover
/// simply starts writing to a fresh key; old buckets age out via their TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// All supported periods, shortest window first.
    pub const ALL: [Period; 4] = [
        Period::Hourly,
        Period::Daily,
        Period::Weekly,
        Period::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    /// Bucket identifier for the window containing `now`.
    ///
    /// Stable within the window, changes exactly at the boundary:
    /// - hourly: `YYYY-MM-DD-HH`
    /// - daily: `YYYY-MM-DD`
    /// - weekly: `YYYY-Wnn` (ISO week date, Monday-anchored)
    /// - monthly: `YYYY-MM`
    pub fn bucket_key(&self, now: OffsetDateTime) -> String {
        let date = now.date();
        match self {
            Period::Hourly => format!(
                "{:04}-{:02}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day(),
                now.hour()
            ),
            Period::Daily => format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
            Period::Weekly => {
                // ISO week-year can differ from the calendar year around
                // January 1st, so both come from the same week-date view.
                let (week_year, week, _) = date.to_iso_week_date();
                format!("{:04}-W{:02}", week_year, week)
            }
            Period::Monthly => format!("{:04}-{:02}", date.year(), u8::from(date.month())),
        }
    }

    /// Counter TTL in seconds; set when a bucket receives its first write so
    /// abandoned buckets are reclaimed even if never read again.
    pub fn ttl_seconds(&self) -> u64 {
        match self {
            Period::Hourly => 3_600,
            Period::Daily => 86_400,
            Period::Weekly => 604_800,
            Period::Monthly => 2_592_000,
        }
    }

    /// Seconds until the window containing `now` rolls over.
    pub fn seconds_until_rollover(&self, now: OffsetDateTime) -> u64 {
        let in_hour = now.minute() as u64 * 60 + now.second() as u64;
        let in_day = now.hour() as u64 * 3_600 + in_hour;
        let rest_of_day = 86_400 - in_day;

        match self {
            Period::Hourly => 3_600 - in_hour,
            Period::Daily => rest_of_day,
            Period::Weekly => {
                let full_days_left = 6 - now.weekday().number_days_from_monday() as u64;
                full_days_left * 86_400 + rest_of_day
            }
            Period::Monthly => {
                let days_in_month = now.month().length(now.year()) as u64;
                let full_days_left = days_in_month - now.day() as u64;
                full_days_left * 86_400 + rest_of_day
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(ModelError::InvalidPeriod(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn hourly_bucket_format() {
        let now = datetime!(2024-06-01 14:35:07 UTC);
        assert_eq!(Period::Hourly.bucket_key(now), "2024-06-01-14");
    }

    #[test]
    fn daily_bucket_format() {
        let now = datetime!(2024-06-01 14:35:07 UTC);
        assert_eq!(Period::Daily.bucket_key(now), "2024-06-01");
    }

    #[test]
    fn weekly_bucket_is_monday_anchored() {
        // 2024-06-01 is a Saturday, 2024-06-03 the following Monday.
        let saturday = datetime!(2024-06-01 23:59:59 UTC);
        let sunday = datetime!(2024-06-02 00:00:01 UTC);
        let monday = datetime!(2024-06-03 00:00:01 UTC);

        assert_eq!(Period::Weekly.bucket_key(saturday), "2024-W22");
        assert_eq!(
            Period::Weekly.bucket_key(saturday),
            Period::Weekly.bucket_key(sunday)
        );
        assert_eq!(Period::Weekly.bucket_key(monday), "2024-W23");
    }

    #[test]
    fn weekly_bucket_uses_iso_week_year() {
        // 2024-12-30 is a Monday belonging to ISO week 1 of 2025.
        let now = datetime!(2024-12-30 12:00:00 UTC);
        assert_eq!(Period::Weekly.bucket_key(now), "2025-W01");
    }

    #[test]
    fn monthly_bucket_format() {
        let now = datetime!(2024-06-15 08:00:00 UTC);
        assert_eq!(Period::Monthly.bucket_key(now), "2024-06");
    }

    #[test]
    fn bucket_changes_at_hour_boundary() {
        let before = datetime!(2024-06-01 13:59:59 UTC);
        let after = datetime!(2024-06-01 14:00:01 UTC);
        assert_ne!(
            Period::Hourly.bucket_key(before),
            Period::Hourly.bucket_key(after)
        );
    }

    #[test]
    fn ttl_values() {
        assert_eq!(Period::Hourly.ttl_seconds(), 3_600);
        assert_eq!(Period::Daily.ttl_seconds(), 86_400);
        assert_eq!(Period::Weekly.ttl_seconds(), 604_800);
        assert_eq!(Period::Monthly.ttl_seconds(), 2_592_000);
    }

    #[test]
    fn rollover_hourly() {
        let now = datetime!(2024-06-01 14:45:00 UTC);
        assert_eq!(Period::Hourly.seconds_until_rollover(now), 900);
    }

    #[test]
    fn rollover_daily() {
        let now = datetime!(2024-06-01 23:00:00 UTC);
        assert_eq!(Period::Daily.seconds_until_rollover(now), 3_600);
    }

    #[test]
    fn rollover_weekly_lands_on_monday() {
        // Saturday 22:00 -> Monday 00:00 is 2h + 24h = 93_600s.
        let now = datetime!(2024-06-01 22:00:00 UTC);
        assert_eq!(Period::Weekly.seconds_until_rollover(now), 93_600);
    }

    #[test]
    fn rollover_monthly() {
        // June has 30 days; from June 29 12:00 there are 1.5 days left.
        let now = datetime!(2024-06-29 12:00:00 UTC);
        assert_eq!(Period::Monthly.seconds_until_rollover(now), 129_600);
    }

    #[test]
    fn parse_roundtrip() {
        for period in Period::ALL {
            let parsed: Period = period.as_str().parse().unwrap();
            assert_eq!(parsed, period);
        }
        assert!("fortnightly".parse::<Period>().is_err());
    }

    #[test]
    fn serde_as_lowercase_string() {
        let json = serde_json::to_string(&Period::Weekly).unwrap();
        assert_eq!(json, r#""weekly""#);
    }
}
