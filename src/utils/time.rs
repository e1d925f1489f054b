use anyhow::{anyhow, bail, Result};
use chrono::{Datelike, NaiveDate, TimeDelta};

/// This is the standard way of converting a date to a string in online-monitor.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Formats a duration as `HH:MM:SS`. Hours are not wrapped at 24 and anything below a second is
/// dropped. Negative values are shown as zero.
pub fn format_duration(duration: TimeDelta) -> String {
    let total = duration.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parses `H:MM:SS`, tolerating a fractional seconds part which is truncated.
pub fn parse_duration(value: &str) -> Result<TimeDelta> {
    let mut parts = value.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("Expected HH:MM:SS, got {value:?}");
    };
    let seconds = seconds.split_once('.').map_or(seconds, |(whole, _)| whole);

    let hours = hours.parse::<i64>()?;
    let minutes = minutes.parse::<i64>()?;
    let seconds = seconds.parse::<i64>()?;
    if hours < 0 || !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        bail!("Duration {value:?} is out of range");
    }

    hours
        .checked_mul(3600)
        .and_then(|v| v.checked_add(minutes * 60 + seconds))
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| anyhow!("Duration {value:?} is too large"))
}

pub fn iso_week(date: NaiveDate) -> u32 {
    date.iso_week().week()
}

/// Serde adapter storing [TimeDelta] as `HH:MM:SS`.
pub mod duration_text {
    use chrono::TimeDelta;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(de::Error::custom)
    }
}
