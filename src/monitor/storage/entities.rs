use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::utils::time::duration_text;

/// Online time of a single day.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub duration: TimeDelta,
}

/// Durations keyed by day. Ordered, so iterating is chronological.
pub type DurationLog = BTreeMap<NaiveDate, TimeDelta>;

/// Value stored on disk for a day.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(transparent)]
pub struct DurationEntity(#[serde(with = "duration_text")] pub TimeDelta);

/// The whole content of the log file.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct DurationLogEntity(pub BTreeMap<NaiveDate, DurationEntity>);

impl From<DurationLogEntity> for DurationLog {
    fn from(DurationLogEntity(entries): DurationLogEntity) -> Self {
        entries
            .into_iter()
            .map(|(date, DurationEntity(duration))| (date, duration))
            .collect()
    }
}

impl From<&DurationLog> for DurationLogEntity {
    fn from(log: &DurationLog) -> Self {
        DurationLogEntity(
            log.iter()
                .map(|(date, duration)| (*date, DurationEntity(*duration)))
                .collect(),
        )
    }
}
