use chrono::{DateTime, FixedOffset, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const FMT_SUBSECOND: &str = "%M:%S.%3f";
const FMT_DATETIME: &str = "%a %b %-d %H:%M";
const FMT_CLOCK: &str = "%H:%M";
const FMT_DAY: &str = "%-d";

/// Intervals shorter than this get millisecond labels.
const SUBSECOND_LABEL_INTERVAL: u64 = 10_000;

/// Timezone in which candle times are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum UserTimezone {
    #[default]
    Utc,
    Local,
}

impl UserTimezone {
    fn localize(self, timestamp_ms: i64) -> Option<DateTime<FixedOffset>> {
        let utc = DateTime::from_timestamp_millis(timestamp_ms)?;
        Some(match self {
            UserTimezone::Utc => utc.fixed_offset(),
            UserTimezone::Local => utc.with_timezone(&Local).fixed_offset(),
        })
    }

    /// Short label for a candle open time: day of month at midnight, `HH:MM` otherwise.
    pub fn format_timestamp(&self, timestamp_ms: i64) -> Option<String> {
        let time = self.localize(timestamp_ms)?;
        let format = if time.hour() == 0 && time.minute() == 0 {
            FMT_DAY
        } else {
            FMT_CLOCK
        };
        Some(time.format(format).to_string())
    }

    /// Full label for a candle of `interval` milliseconds, `None` for out of range timestamps.
    pub fn format_crosshair_timestamp(&self, timestamp_ms: i64, interval: u64) -> Option<String> {
        let time = self.localize(timestamp_ms)?;
        let format = if interval < SUBSECOND_LABEL_INTERVAL {
            FMT_SUBSECOND
        } else {
            FMT_DATETIME
        };
        Some(time.format(format).to_string())
    }

    fn name(self) -> &'static str {
        match self {
            UserTimezone::Utc => "UTC",
            UserTimezone::Local => "Local",
        }
    }
}

impl fmt::Display for UserTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserTimezone::Utc => f.write_str(self.name()),
            UserTimezone::Local => {
                let offset = Local::now().offset().local_minus_utc();
                write!(
                    f,
                    "Local (UTC {:+03}:{:02})",
                    offset / 3600,
                    (offset % 3600).abs() / 60
                )
            }
        }
    }
}

impl FromStr for UserTimezone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("utc") {
            Ok(UserTimezone::Utc)
        } else if s.eq_ignore_ascii_case("local") {
            Ok(UserTimezone::Local)
        } else {
            Err(format!("unknown timezone {s:?}, expected UTC or Local"))
        }
    }
}

impl<'de> Deserialize<'de> for UserTimezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for UserTimezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_labels() {
        let tz = UserTimezone::Utc;
        assert_eq!(tz.format_timestamp(0).as_deref(), Some("1"));
        assert_eq!(tz.format_timestamp(5_400_000).as_deref(), Some("01:30"));
        assert_eq!(
            tz.format_crosshair_timestamp(5_400_000, 900_000).as_deref(),
            Some("Thu Jan 1 01:30")
        );
        assert_eq!(
            tz.format_crosshair_timestamp(1_234, 1_000).as_deref(),
            Some("00:01.234")
        );
        assert_eq!(tz.format_timestamp(i64::MAX), None);
    }

    #[test]
    fn serde_is_case_insensitive() {
        let tz: UserTimezone = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(tz, UserTimezone::Local);
        assert_eq!(serde_json::to_string(&UserTimezone::Utc).unwrap(), "\"UTC\"");
        assert!(serde_json::from_str::<UserTimezone>("\"Mars\"").is_err());
    }
}
