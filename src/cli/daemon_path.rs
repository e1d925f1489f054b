use std::path::PathBuf;

pub const DAEMON_BINARY_NAME: &str = "online-monitor-daemon";

/// Path of the daemon binary installed next to `path`.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name(DAEMON_BINARY_NAME);
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}
