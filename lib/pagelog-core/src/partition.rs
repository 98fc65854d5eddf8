use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Datelike as _, Duration, NaiveDate, TimeZone as _, Timelike as _, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::PartitionGranularity;

/// Error returned when a partition key cannot be parsed.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PartitionKeyParseError {
    /// The input did not match any accepted layout.
    #[snafu(display(
        "'{}' is not a partition key (expected YYYY-MM-DD, YYYY-MM-DDTHH, or year=YYYY/month=MM/day=DD[/hour=HH])",
        input
    ))]
    InvalidLayout {
        /// The rejected input.
        input: String,
    },

    /// The components parsed but do not form a real date and hour.
    #[snafu(display("'{}' does not name a valid date and hour", input))]
    OutOfRange {
        /// The rejected input.
        input: String,
    },
}

/// A date-bucketed storage location.
///
/// Keys order chronologically. The `hour` component is only present for hour-granular keys.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PartitionKey {
    /// Calendar year (UTC).
    pub year: i32,

    /// Month of the year, 1-12.
    pub month: u32,

    /// Day of the month, 1-31.
    pub day: u32,

    /// Hour of the day, 0-23.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
}

/// Derives the partition key for a timestamp.
///
/// Total and monotone: every timestamp maps to a key, and later timestamps never map to earlier keys.
pub fn partition_key_of(timestamp: &DateTime<Utc>, granularity: PartitionGranularity) -> PartitionKey {
    PartitionKey {
        year: timestamp.year(),
        month: timestamp.month(),
        day: timestamp.day(),
        hour: match granularity {
            PartitionGranularity::Day => None,
            PartitionGranularity::Hour => Some(timestamp.hour()),
        },
    }
}

impl PartitionKey {
    fn checked(year: i32, month: u32, day: u32, hour: Option<u32>) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)?;
        if hour.is_some_and(|hour| hour > 23) {
            return None;
        }

        Some(Self { year, month, day, hour })
    }

    /// Returns the granularity this key was derived at.
    pub const fn granularity(&self) -> PartitionGranularity {
        match self.hour {
            Some(_) => PartitionGranularity::Hour,
            None => PartitionGranularity::Day,
        }
    }

    /// Returns the first instant covered by this key.
    pub fn start_time(&self) -> DateTime<Utc> {
        // Keys are only ever built from real timestamps or through `checked`, so the date is valid.
        Utc.with_ymd_and_hms(self.year, self.month, self.day, self.hour.unwrap_or(0), 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Returns the first instant after this key.
    pub fn end_time(&self) -> DateTime<Utc> {
        let width = match self.granularity() {
            PartitionGranularity::Day => Duration::days(1),
            PartitionGranularity::Hour => Duration::hours(1),
        };
        self.start_time()
            .checked_add_signed(width)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the Hive-style relative path for this key, such as `year=2024/month=04/day=20`.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.to_string())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "year={:04}/month={:02}/day={:02}", self.year, self.month, self.day)?;
        if let Some(hour) = self.hour {
            write!(f, "/hour={:02}", hour)?;
        }
        Ok(())
    }
}

impl FromStr for PartitionKey {
    type Err = PartitionKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLayout { input: s }.build();
        let number = |part: &str| part.parse::<u32>().map_err(|_| invalid());

        let (year, month, day, hour) = if s.starts_with("year=") {
            let mut parts = s.trim_end_matches('/').split('/');
            let year = hive_component(parts.next(), "year").ok_or_else(invalid)?;
            let month = hive_component(parts.next(), "month").ok_or_else(invalid)?;
            let day = hive_component(parts.next(), "day").ok_or_else(invalid)?;
            let hour = match parts.next() {
                None => None,
                Some(part) => Some(hive_component(Some(part), "hour").ok_or_else(invalid)?),
            };
            if parts.next().is_some() {
                return Err(invalid());
            }
            (year, month, day, hour)
        } else {
            let (date, hour) = match s.split_once('T') {
                Some((date, hour)) => (date, Some(hour)),
                None => (s, None),
            };
            let mut parts = date.split('-');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(year), Some(month), Some(day), None) => (year, month, day, hour),
                _ => return Err(invalid()),
            }
        };

        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let hour = hour.map(number).transpose()?;

        PartitionKey::checked(year, number(month)?, number(day)?, hour).ok_or_else(|| OutOfRange { input: s }.build())
    }
}

fn hive_component<'a>(part: Option<&'a str>, name: &str) -> Option<&'a str> {
    part?.strip_prefix(name)?.strip_prefix('=')
}

/// An inclusive range of partitions treated as one aggregation unit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AggregationWindow {
    start: PartitionKey,
    end: PartitionKey,
}

impl AggregationWindow {
    /// Creates a window covering a single partition.
    pub fn single(key: PartitionKey) -> Self {
        Self { start: key, end: key }
    }

    /// Creates a window covering `start` through `end`, inclusive.
    ///
    /// The bounds are swapped if given out of order.
    pub fn new(start: PartitionKey, end: PartitionKey) -> Self {
        if end.start_time() < start.start_time() {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Returns the first partition in the window.
    pub const fn start(&self) -> &PartitionKey {
        &self.start
    }

    /// Returns the last partition in the window.
    pub const fn end(&self) -> &PartitionKey {
        &self.end
    }

    /// Returns `true` if the given partition falls inside this window.
    ///
    /// Containment is decided on the time span each key covers, so hour-granular partitions can be selected with a
    /// day-granular window and vice versa.
    pub fn contains(&self, key: &PartitionKey) -> bool {
        key.start_time() < self.end.end_time() && key.end_time() > self.start.start_time()
    }

    /// Returns a stable, filesystem-safe identifier for this window.
    pub fn id(&self) -> String {
        let compact = |key: &PartitionKey| match key.hour {
            Some(hour) => format!("{:04}-{:02}-{:02}T{:02}", key.year, key.month, key.day, hour),
            None => format!("{:04}-{:02}-{:02}", key.year, key.month, key.day),
        };

        if self.start == self.end {
            compact(&self.start)
        } else {
            format!("{}..{}", compact(&self.start), compact(&self.end))
        }
    }
}

impl fmt::Display for AggregationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn same_day_same_day_partition() {
        let early = ts("2024-04-20T01:00:00Z");
        let late = ts("2024-04-20T23:59:59Z");

        assert_eq!(
            partition_key_of(&early, PartitionGranularity::Day),
            partition_key_of(&late, PartitionGranularity::Day)
        );
        assert_ne!(
            partition_key_of(&early, PartitionGranularity::Hour),
            partition_key_of(&late, PartitionGranularity::Hour)
        );
    }

    #[test]
    fn display_and_parse() {
        let key = partition_key_of(&ts("2024-04-20T01:30:00Z"), PartitionGranularity::Hour);
        assert_eq!(key.to_string(), "year=2024/month=04/day=20/hour=01");
        assert_eq!(key.to_string().parse::<PartitionKey>().unwrap(), key);
        assert_eq!("2024-04-20T01".parse::<PartitionKey>().unwrap(), key);

        let day = partition_key_of(&ts("2024-04-20T01:30:00Z"), PartitionGranularity::Day);
        assert_eq!("2024-04-20".parse::<PartitionKey>().unwrap(), day);
        assert_eq!("year=2024/month=04/day=20/".parse::<PartitionKey>().unwrap(), day);
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "2024-04", "2024-13-01", "2024-02-30", "2024-04-20T24", "year=2024/day=20", "yesterday"] {
            assert!(input.parse::<PartitionKey>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn key_time_span() {
        let day: PartitionKey = "2024-04-20".parse().unwrap();
        assert_eq!(day.start_time(), ts("2024-04-20T00:00:00Z"));
        assert_eq!(day.end_time(), ts("2024-04-21T00:00:00Z"));

        let hour: PartitionKey = "2024-04-20T23".parse().unwrap();
        assert_eq!(hour.end_time(), ts("2024-04-21T00:00:00Z"));
    }

    #[test]
    fn last_representable_partition_saturates() {
        for granularity in [PartitionGranularity::Day, PartitionGranularity::Hour] {
            let key = partition_key_of(&DateTime::<Utc>::MAX_UTC, granularity);
            let parsed = key.to_string().parse::<PartitionKey>().unwrap();
            assert_eq!(parsed, key);
            assert_eq!(parsed.end_time(), DateTime::<Utc>::MAX_UTC);

            let window = AggregationWindow::single(parsed);
            assert!(window.contains(&parsed));
            assert!(!window.contains(&"2024-04-20".parse().unwrap()));
        }
    }

    #[test]
    fn window_containment_across_granularities() {
        let window = AggregationWindow::new("2024-04-21".parse().unwrap(), "2024-04-20".parse().unwrap());
        assert_eq!(window.id(), "2024-04-20..2024-04-21");

        assert!(window.contains(&"2024-04-20T00".parse().unwrap()));
        assert!(window.contains(&"2024-04-21T23".parse().unwrap()));
        assert!(!window.contains(&"2024-04-22T00".parse().unwrap()));
        assert!(!window.contains(&"2024-04-19".parse().unwrap()));

        let hourly = AggregationWindow::single("2024-04-20T05".parse().unwrap());
        assert_eq!(hourly.id(), "2024-04-20T05");
        assert!(hourly.contains(&"2024-04-20".parse().unwrap()));
        assert!(!hourly.contains(&"2024-04-20T06".parse().unwrap()));
    }

    fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        // 1970-01-01 through roughly 2100.
        (0i64..4_102_444_800).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn arb_granularity() -> impl Strategy<Value = PartitionGranularity> {
        prop_oneof![Just(PartitionGranularity::Day), Just(PartitionGranularity::Hour)]
    }

    proptest! {
        #[test]
        fn property_test_partition_key_monotone(a in arb_timestamp(), b in arb_timestamp(), granularity in arb_granularity()) {
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(partition_key_of(&early, granularity) <= partition_key_of(&late, granularity));
        }

        #[test]
        fn property_test_partition_key_covers_timestamp(t in arb_timestamp(), granularity in arb_granularity()) {
            let key = partition_key_of(&t, granularity);
            prop_assert!(key.start_time() <= t && t < key.end_time());
            prop_assert_eq!(key.to_string().parse::<PartitionKey>().unwrap(), key);
        }
    }
}
