//! Starting the monitor together with the user session. Linux uses an XDG autostart entry,
//! Windows the `Run` key of the current user. Both are overwritten on every registration, so
//! registering again never leaves a duplicate behind.

use std::{
    env,
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use tracing::info;

pub const STARTUP_ENTRY_NAME: &str = "OnlineMonitor";
const DESKTOP_FILE_NAME: &str = "online-monitor.desktop";

/// What gets launched on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupEntry {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl StartupEntry {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            args: vec![],
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command line with every part quoted.
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_os_str())
            .chain(self.args.iter().map(OsStr::new))
            .map(|part| format!("\"{}\"", part.to_string_lossy().replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn register(entry: &StartupEntry) -> Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            run_registry::register(entry)
        } else if #[cfg(target_os = "linux")] {
            XdgAutostart::from_env()?.register(entry)
        } else {
            let _ = entry;
            Err(anyhow!("Startup registration is not supported on this platform"))
        }
    }
}

pub fn unregister() -> Result<()> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            run_registry::unregister()
        } else if #[cfg(target_os = "linux")] {
            XdgAutostart::from_env()?.unregister()
        } else {
            Err(anyhow!("Startup registration is not supported on this platform"))
        }
    }
}

/// `.desktop` file inside an autostart directory.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub struct XdgAutostart {
    dir: PathBuf,
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
impl XdgAutostart {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn from_env() -> Result<Self> {
        let config = env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
            .map_err(|_| anyhow!("Couldn't find neither XDG_CONFIG_HOME nor HOME"))?;
        Ok(Self::new(config.join("autostart")))
    }

    fn path(&self) -> PathBuf {
        self.dir.join(DESKTOP_FILE_NAME)
    }

    pub fn register(&self, entry: &StartupEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path();
        std::fs::write(&path, desktop_entry(entry))?;
        info!("Registered startup entry {path:?}");
        Ok(())
    }

    pub fn unregister(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => {
                info!("Removed startup entry {:?}", self.path());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_registered(&self) -> Result<bool> {
        Ok(self.path().try_exists()?)
    }
}

fn desktop_entry(entry: &StartupEntry) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={STARTUP_ENTRY_NAME}\n\
         Comment=Tracks how long this machine is online\n\
         Exec={}\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n",
        entry.command_line()
    )
}

#[cfg(windows)]
mod run_registry {
    use std::process::{Command, Stdio};

    use anyhow::{bail, Result};
    use tracing::info;

    use super::{StartupEntry, STARTUP_ENTRY_NAME};

    const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

    fn reg(args: &[&str]) -> Result<bool> {
        let status = Command::new("reg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    pub fn register(entry: &StartupEntry) -> Result<()> {
        let command_line = entry.command_line();
        // /f overwrites the existing value instead of asking.
        if !reg(&["add", RUN_KEY, "/v", STARTUP_ENTRY_NAME, "/t", "REG_SZ", "/d", &command_line, "/f"])? {
            bail!("Failed to write {RUN_KEY}\\{STARTUP_ENTRY_NAME}");
        }
        info!("Registered startup entry {command_line}");
        Ok(())
    }

    pub fn unregister() -> Result<()> {
        if is_registered()? && !reg(&["delete", RUN_KEY, "/v", STARTUP_ENTRY_NAME, "/f"])? {
            bail!("Failed to delete {RUN_KEY}\\{STARTUP_ENTRY_NAME}");
        }
        Ok(())
    }

    fn is_registered() -> Result<bool> {
        reg(&["query", RUN_KEY, "/v", STARTUP_ENTRY_NAME])
    }
}
