use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Process, Signal, System};
use tracing::info;

use super::daemon_path::to_daemon_path;

/// Kills monitors started from this installation: the daemon binary next to `cli` or `cli serve`.
/// Returns how many processes were stopped.
pub fn kill_previous_servers(cli: &Path) -> Result<usize> {
    let daemon = to_daemon_path(cli.to_path_buf());
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get own pid {e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if is_monitor_process(process, cli, &daemon) {
            info!("Stopping monitor {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

fn is_monitor_process(process: &Process, cli: &Path, daemon: &Path) -> bool {
    let Some(exe) = process.exe().filter(|v| v.exists()) else {
        return false;
    };
    if exe == daemon {
        return true;
    }
    exe == cli && process.cmd().iter().any(|arg| arg == OsStr::new("serve"))
}

/// Intended for shutting down previous monitor and starting new one. Runs `serve` of the current
/// executable as a detached process.
pub fn restart_monitor(dir: Option<&Path>) -> Result<()> {
    let process_name = std::env::current_exe()?;
    kill_previous_servers(&process_name)?;
    let mut command = std::process::Command::new(&process_name);
    command.args(serve_args(dir));

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    #[allow(clippy::zombie_processes)]
    let child = command.spawn()?;
    info!("Spawned monitor {}", child.id());
    Ok(())
}

fn serve_args(dir: Option<&Path>) -> Vec<PathBuf> {
    // Global options go before the subcommand.
    let mut args = vec![];
    if let Some(dir) = dir {
        args.push(PathBuf::from("--dir"));
        args.push(dir.to_path_buf());
    }
    args.push(PathBuf::from("serve"));
    args
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::serve_args;

    #[test]
    fn test_serve_args() {
        assert_eq!(serve_args(None), vec![PathBuf::from("serve")]);
        assert_eq!(
            serve_args(Some(Path::new("/tmp/monitor"))),
            vec![
                PathBuf::from("--dir"),
                PathBuf::from("/tmp/monitor"),
                PathBuf::from("serve")
            ]
        );
    }
}
