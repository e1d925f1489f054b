use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{self, AsyncWriteExt},
};
use tracing::{debug, info};

/// Writes `contents` into a sibling temporary file and renames it over `path`. A crash midway
/// leaves either the old file or the new one, never a half written target.
pub async fn write_replacing(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temporary = temporary_path(path);
    let mut file = File::create(&temporary).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temporary, path).await
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|v| v.to_os_string())
        .unwrap_or_else(|| OsString::from("data"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Exclusive lock over a file for the lifetime of the value. Used to keep a single monitor per
/// application directory; the lock goes away together with the file handle.
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    /// Waits until no other process holds the lock. A monitor that is still flushing its last
    /// day therefore finishes before a new one starts counting.
    pub async fn acquire(path: &Path) -> Result<Self, io::Error> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;

        debug!("Acquiring instance lock {path:?}");
        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|_| file))
            .await
            .map_err(io::Error::other)??;
        info!("Acquired instance lock {path:?}");

        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{write_replacing, InstanceLock};

    #[tokio::test]
    async fn test_write_replacing_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.json");

        write_replacing(&path, b"first").await?;
        write_replacing(&path, b"second").await?;

        assert_eq!(tokio::fs::read_to_string(&path).await?, "second");
        let names = std::fs::read_dir(dir.path())?
            .map(|v| v.map(|v| v.file_name()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(names, vec!["data.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_instance_lock_released_on_drop() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("monitor.lock");

        let lock = InstanceLock::acquire(&path).await?;
        drop(lock);
        let _again = InstanceLock::acquire(&path).await?;
        Ok(())
    }
}
