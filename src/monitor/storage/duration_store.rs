use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info, warn};

use crate::{fs::operations::write_replacing, utils::time::format_duration};

use super::entities::{DurationLog, DurationLogEntity};

pub const LOG_FILE_NAME: &str = "online_duration.json";

/// Interface for abstracting storage of daily durations.
pub trait DurationStore {
    /// Reads every stored day. Missing or unreadable data yields an empty log, this never fails.
    fn load(&self) -> impl Future<Output = DurationLog> + Send;

    /// Sets the duration of `date`, replacing a previous value for the same day.
    fn upsert(&self, date: NaiveDate, duration: TimeDelta)
        -> impl Future<Output = Result<()>> + Send;
}

impl<T: Deref + Sync> DurationStore for T
where
    T::Target: DurationStore + Sync,
{
    fn load(&self) -> impl Future<Output = DurationLog> + Send {
        self.deref().load()
    }

    fn upsert(
        &self,
        date: NaiveDate,
        duration: TimeDelta,
    ) -> impl Future<Output = Result<()>> + Send {
        self.deref().upsert(date, duration)
    }
}

/// The main realization of [DurationStore]. Keeps the whole log in one JSON file.
///
/// There is no protection against other processes writing the same file. The monitor itself
/// keeps to one instance per directory.
pub struct JsonDurationStore {
    path: PathBuf,
}

impl JsonDurationStore {
    pub fn new(dir: &Path) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            path: dir.join(LOG_FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_log(&self) -> Result<DurationLogEntity> {
        let content = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn serialize_log(log: &DurationLog) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        DurationLogEntity::from(log).serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}

impl DurationStore for JsonDurationStore {
    async fn load(&self) -> DurationLog {
        match self.read_log().await {
            Ok(log) => log.into(),
            Err(e) => {
                match e.downcast_ref::<std::io::Error>() {
                    Some(io) if io.kind() == ErrorKind::NotFound => {
                        debug!("No duration log at {:?} yet", self.path)
                    }
                    // Content we can't read gets replaced by the next write.
                    _ => warn!("Ignoring unreadable duration log {:?}: {e}", self.path),
                }
                DurationLog::new()
            }
        }
    }

    async fn upsert(&self, date: NaiveDate, duration: TimeDelta) -> Result<()> {
        let mut log = self.load().await;
        log.insert(date, duration);

        let buffer = Self::serialize_log(&log)?;
        write_replacing(&self.path, &buffer).await?;
        info!("Stored {} for {date}", format_duration(duration));
        Ok(())
    }
}
