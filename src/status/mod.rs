//! What the monitor shows to the user. The polling loop produces a [StatusSnapshot] after every
//! poll and hands it to each [StatusSurface]; nothing else reads the timer.

use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use ansi_term::Colour;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::{
    fs::operations::write_replacing,
    utils::time::{duration_text, format_duration},
};

pub const STATUS_FILE_NAME: &str = "status.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub day: NaiveDate,
    #[serde(with = "duration_text")]
    pub online: TimeDelta,
    pub week: u32,
    pub reachable: bool,
    pub locked: bool,
    pub counting: bool,
    /// Last problem worth showing, for example a day that couldn't be stored.
    #[serde(default)]
    pub problem: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Text shown next to the badge, `HH:MM:SS (Week N)`.
    pub fn label(&self) -> String {
        format!("{} (Week {})", format_duration(self.online), self.week)
    }

    pub fn badge(&self) -> Badge {
        if self.counting {
            Badge::Online
        } else if self.locked {
            Badge::Locked
        } else {
            Badge::Offline
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Online,
    Locked,
    Offline,
}

impl Badge {
    fn colour(&self) -> Colour {
        match self {
            Badge::Online => Colour::Green,
            Badge::Locked => Colour::Yellow,
            Badge::Offline => Colour::Red,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Badge::Online => "●",
            Badge::Locked => "◐",
            Badge::Offline => "○",
        }
    }

    pub fn paint(&self) -> String {
        self.colour().bold().paint(self.symbol()).to_string()
    }
}

impl Display for Badge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Badge::Online => write!(f, "online"),
            Badge::Locked => write!(f, "locked"),
            Badge::Offline => write!(f, "offline"),
        }
    }
}

/// Somewhere a snapshot can be shown. Released once when the monitor stops.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusSurface: Send {
    async fn render(&mut self, snapshot: &StatusSnapshot) -> Result<()>;

    fn release(&mut self);
}

/// Keeps the latest snapshot in a file, which is what the `status` command reads.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StatusSurface for StatusFile {
    async fn render(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        let buffer = serde_json::to_vec_pretty(snapshot)?;
        write_replacing(&self.path, &buffer).await?;
        Ok(())
    }

    fn release(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed status file {:?}", self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove status file {:?} {e:?}", self.path),
        }
    }
}

/// Prints a line whenever the badge changes. Only used when the monitor runs in a console.
#[derive(Default)]
pub struct ConsoleStatus {
    last_badge: Option<Badge>,
}

#[async_trait]
impl StatusSurface for ConsoleStatus {
    async fn render(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        let badge = snapshot.badge();
        if self.last_badge != Some(badge) {
            println!("{} {} {}", badge.paint(), snapshot.label(), badge);
            self.last_badge = Some(badge);
        }
        Ok(())
    }

    fn release(&mut self) {
        println!("{} stopped", Colour::Fixed(244).paint("○"));
    }
}

/// Every surface the monitor renders to. Releases all of them when dropped, whichever way the
/// monitor exits.
#[derive(Default)]
pub struct StatusSurfaces {
    surfaces: Vec<Box<dyn StatusSurface>>,
}

impl StatusSurfaces {
    pub fn new(surfaces: Vec<Box<dyn StatusSurface>>) -> Self {
        Self { surfaces }
    }

    pub async fn render(&mut self, snapshot: &StatusSnapshot) {
        for surface in self.surfaces.iter_mut() {
            if let Err(e) = surface.render(snapshot).await {
                warn!("Failed to render status {e:?}");
            }
        }
    }
}

impl Drop for StatusSurfaces {
    fn drop(&mut self) {
        for surface in self.surfaces.iter_mut() {
            surface.release();
        }
    }
}

/// Reads the snapshot the running monitor left behind. `None` when no monitor is running.
pub async fn read_status(path: &Path) -> Result<Option<StatusSnapshot>> {
    match tokio::fs::read(path).await {
        Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{NaiveDate, TimeDelta, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{
        read_status, Badge, MockStatusSurface, StatusFile, StatusSnapshot, StatusSurface,
        StatusSurfaces,
    };

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            day: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            online: TimeDelta::seconds(3725),
            week: 11,
            reachable: true,
            locked: false,
            counting: true,
            problem: None,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_label() {
        assert_eq!(snapshot().label(), "01:02:05 (Week 11)");
    }

    #[test]
    fn test_badge_prefers_lock_over_offline() {
        let mut value = snapshot();
        assert_eq!(value.badge(), Badge::Online);

        value.counting = false;
        value.locked = true;
        value.reachable = false;
        assert_eq!(value.badge(), Badge::Locked);

        value.locked = false;
        assert_eq!(value.badge(), Badge::Offline);
    }

    #[tokio::test]
    async fn test_status_file_lifecycle() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("status.json");
        let mut file = StatusFile::new(path.clone());

        assert_eq!(read_status(&path).await?, None);

        file.render(&snapshot()).await?;
        assert_eq!(read_status(&path).await?, Some(snapshot()));

        file.release();
        assert_eq!(read_status(&path).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_surfaces_release_on_drop_even_after_errors() {
        let mut failing = MockStatusSurface::new();
        failing
            .expect_render()
            .returning(|_| Err(anyhow::anyhow!("tray is gone")));
        failing.expect_release().times(1).return_const(());

        let mut working = MockStatusSurface::new();
        working.expect_render().times(1).returning(|_| Ok(()));
        working.expect_release().times(1).return_const(());

        let mut surfaces = StatusSurfaces::new(vec![Box::new(failing), Box::new(working)]);
        surfaces.render(&snapshot()).await;
        drop(surfaces);
    }
}
