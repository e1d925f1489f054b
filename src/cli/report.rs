use std::{
    fmt::Display,
    io::{self, BufRead, Write},
    path::Path,
};

use ansi_term::Style;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeDelta};
use chrono_english::parse_date_string;
use clap::{Parser, ValueEnum};

use crate::{
    monitor::storage::{
        duration_store::{DurationStore, JsonDurationStore},
        entities::{DailyRecord, DurationLog},
    },
    utils::time::{date_to_record_name, format_duration},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct ReportCommand {
    #[arg(
        long = "start",
        short,
        help = "First day of the report, inclusive. Either YYYY-MM-DD (a prefix like 2025-03 also works) or something like \"yesterday\", \"15/03/2025\""
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "Last day of the report, inclusive. Same formats as --start"
    )]
    end_date: Option<String>,
    #[arg(
        short,
        long,
        help = "Ask for the range on stdin. Leaving an answer empty means no bound"
    )]
    interactive: bool,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

/// Inclusive range over `YYYY-MM-DD` keys. Bounds compare as text, a missing bound is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRange {
    pub fn contains(&self, key: &str) -> bool {
        self.start.as_deref().map_or(true, |start| key >= start)
            && self.end.as_deref().map_or(true, |end| key <= end)
    }
}

/// Days of `log` inside `range`, oldest first.
pub fn filter_records(log: &DurationLog, range: &DateRange) -> Vec<DailyRecord> {
    log.iter()
        .filter(|(date, _)| range.contains(&date_to_record_name(**date)))
        .map(|(date, duration)| DailyRecord {
            date: *date,
            duration: *duration,
        })
        .collect()
}

/// Command to process `report` command. Prints the stored online time of every day in the
/// requested range.
pub async fn process_report_command(
    ReportCommand {
        start_date,
        end_date,
        interactive,
        date_style,
    }: ReportCommand,
    dir: &Path,
) -> Result<()> {
    let storage = JsonDurationStore::new(dir)?;
    let log = storage.load().await;

    println!("{}", Style::new().bold().paint("--- Online Duration Report ---"));
    if log.is_empty() {
        println!("No data available.");
        return Ok(());
    }

    let (start_date, end_date) = if interactive {
        (
            prompt("Start date (YYYY-MM-DD): ")?,
            prompt("End date (YYYY-MM-DD): ")?,
        )
    } else {
        (start_date, end_date)
    };

    let now = Local::now();
    let dialect = date_style.into();
    let range = DateRange {
        start: start_date
            .map(|v| normalize_bound(&v, now, dialect))
            .transpose()?
            .flatten(),
        end: end_date
            .map(|v| normalize_bound(&v, now, dialect))
            .transpose()?
            .flatten(),
    };

    let records = filter_records(&log, &range);
    for record in &records {
        println!("{}: {}", record.date, format_duration(record.duration));
    }

    let total = records
        .iter()
        .fold(TimeDelta::zero(), |sum, record| sum + record.duration);
    println!(
        "{} {} over {} day(s)",
        Style::new().bold().paint("Total:"),
        format_duration(total),
        records.len()
    );
    Ok(())
}

fn prompt(question: &str) -> Result<Option<String>> {
    print!("{question}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(Some(line))
}

/// Keeps date-like input as typed so it compares as text against the stored keys. Anything
/// else goes through natural language parsing and becomes a `YYYY-MM-DD` key.
fn normalize_bound(
    value: &str,
    now: DateTime<Local>,
    dialect: chrono_english::Dialect,
) -> Result<Option<String>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if is_record_name_prefix(value) {
        return Ok(Some(value.to_string()));
    }
    let parsed = parse_date_string(value, now, dialect)
        .map_err(|e| anyhow!("Failed to parse date {value:?}: {e}"))?;
    Ok(Some(date_to_record_name(parsed.date_naive())))
}

fn is_record_name_prefix(value: &str) -> bool {
    value.chars().take(4).filter(|c| c.is_ascii_digit()).count() == 4
        && value.chars().all(|c| c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use chrono::{Local, NaiveDate, TimeDelta, TimeZone};

    use crate::monitor::storage::entities::{DailyRecord, DurationLog};

    use super::{filter_records, normalize_bound, DateRange};

    fn log() -> DurationLog {
        [(2024, 2, 28, 100), (2024, 3, 1, 200), (2024, 3, 2, 300), (2024, 4, 1, 400)]
            .into_iter()
            .map(|(y, m, d, s)| {
                (
                    NaiveDate::from_ymd_opt(y, m, d).unwrap(),
                    TimeDelta::seconds(s),
                )
            })
            .collect()
    }

    fn range(start: Option<&str>, end: Option<&str>) -> DateRange {
        DateRange {
            start: start.map(String::from),
            end: end.map(String::from),
        }
    }

    fn seconds(records: Vec<DailyRecord>) -> Vec<i64> {
        records.into_iter().map(|v| v.duration.num_seconds()).collect()
    }

    #[test]
    fn test_filter_inclusive_bounds() {
        let records = filter_records(&log(), &range(Some("2024-03-01"), Some("2024-03-02")));
        assert_eq!(seconds(records), vec![200, 300]);
    }

    #[test]
    fn test_filter_open_bounds() {
        assert_eq!(seconds(filter_records(&log(), &range(None, None))), vec![100, 200, 300, 400]);
        assert_eq!(seconds(filter_records(&log(), &range(Some("2024-03-02"), None))), vec![300, 400]);
        assert_eq!(seconds(filter_records(&log(), &range(None, Some("2024-03-01")))), vec![100, 200]);
    }

    #[test]
    fn test_filter_compares_text() {
        // "2024-03" sorts before every day of March, so it works as an open start of the month.
        let records = filter_records(&log(), &range(Some("2024-03"), Some("2024-03-31")));
        assert_eq!(seconds(records), vec![200, 300]);
    }

    #[test]
    fn test_normalize_bound() {
        let now = Local.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let dialect = chrono_english::Dialect::Uk;

        assert_eq!(normalize_bound("  ", now, dialect).unwrap(), None);
        assert_eq!(
            normalize_bound("2024-03-01\n", now, dialect).unwrap(),
            Some("2024-03-01".to_string())
        );
        assert_eq!(
            normalize_bound("yesterday", now, dialect).unwrap(),
            Some("2024-03-14".to_string())
        );
        assert!(normalize_bound("not a date at all", now, dialect).is_err());
        assert!(normalize_bound("202é", now, dialect).is_err());
        assert!(normalize_bound("é2024-03", now, dialect).is_err());
    }
}
