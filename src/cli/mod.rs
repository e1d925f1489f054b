pub mod daemon_path;
pub mod process;
pub mod report;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_previous_servers, restart_monitor};
use report::{process_report_command, ReportCommand};
use tracing::{info, level_filters::LevelFilter, warn};

use crate::{
    monitor::{
        args::MonitorArgs,
        shutdown::{request_stop, STOP_REQUEST_FILE_NAME},
        start_monitor,
    },
    startup::{self, StartupEntry},
    status::{read_status, STATUS_FILE_NAME},
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "online-monitor", version, long_about = None)]
#[command(about = "Tracks how long this machine is online each day", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long = "log-filter", global = true, help = "Enable logging with the given level")]
    log: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Registers the monitor for startup and starts it in the background")]
    Init {},
    #[command(
        about = "Run the monitor directly in current console. Used for starting it in the background internally and for debugging"
    )]
    Serve {
        #[command(flatten)]
        monitor: MonitorArgs,
        #[arg(long = "log-console", help = "Mirror the log to stdout")]
        log_console: bool,
    },
    #[command(about = "Stop currently running monitor. Today's time is stored before it exits")]
    Stop {},
    #[command(about = "Display online time per day")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
    #[command(about = "Display what the running monitor currently shows")]
    Status {},
    #[command(about = "Start the monitor together with the user session")]
    Register {},
    #[command(about = "Stop starting the monitor together with the user session")]
    Unregister {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();
    let dir = resolve_application_path(args.dir.clone())?;
    let custom_dir = absolute_custom_dir(args.dir.as_deref(), &dir)?;
    let custom_dir = custom_dir.as_deref();

    let (prefix, log_console) = match &args.commands {
        Commands::Serve { log_console, .. } => (DAEMON_PREFIX, *log_console),
        _ => (CLI_PREFIX, false),
    };
    enable_logging(prefix, &dir, args.log, log_console)?;

    match args.commands {
        Commands::Init {} => {
            register_startup(custom_dir)?;
            restart_monitor(custom_dir)?;
            println!("Monitor started");
            Ok(())
        }
        Commands::Serve { monitor, .. } => start_monitor(dir, monitor.into_config(true)).await,
        Commands::Stop {} => stop_monitor(&dir).await,
        Commands::Report { command } => process_report_command(command, &dir).await,
        Commands::Status {} => print_status(&dir).await,
        Commands::Register {} => {
            register_startup(custom_dir)?;
            println!("Registered for startup");
            Ok(())
        }
        Commands::Unregister {} => {
            startup::unregister()?;
            println!("Removed from startup");
            Ok(())
        }
    }
}

/// The `--dir` given by the user as an absolute path, so the startup entry and the spawned monitor
/// don't depend on the working directory they are launched from.
fn absolute_custom_dir(custom_dir: Option<&Path>, resolved: &Path) -> Result<Option<PathBuf>> {
    custom_dir
        .map(|_| std::fs::canonicalize(resolved))
        .transpose()
        .map_err(Into::into)
}

fn register_startup(custom_dir: Option<&Path>) -> Result<()> {
    let mut entry = StartupEntry::new(to_daemon_path(std::env::current_exe()?));
    if let Some(dir) = custom_dir {
        entry = entry
            .with_arg("--dir")
            .with_arg(dir.to_string_lossy().into_owned());
    }
    startup::register(&entry)
}

/// Asks the monitor to stop through the application directory so the current day gets stored.
/// Monitors that don't react in time are killed.
async fn stop_monitor(dir: &Path) -> Result<()> {
    let status = dir.join(STATUS_FILE_NAME);
    if tokio::fs::try_exists(&status).await? {
        request_stop(&dir.join(STOP_REQUEST_FILE_NAME)).await?;
        let stopped = tokio::time::timeout(STOP_TIMEOUT, async {
            while tokio::fs::try_exists(&status).await.unwrap_or(false) {
                tokio::time::sleep(STOP_CHECK_INTERVAL).await;
            }
        })
        .await;
        match stopped {
            Ok(()) => info!("Monitor stopped"),
            Err(_) => warn!("Monitor didn't stop in {STOP_TIMEOUT:?}"),
        }
    }

    let killed = kill_previous_servers(&std::env::current_exe()?)?;
    if killed > 0 {
        warn!("Killed {killed} monitor process(es)");
    }
    println!("Monitor stopped");
    Ok(())
}

async fn print_status(dir: &Path) -> Result<()> {
    let Some(snapshot) = read_status(&dir.join(STATUS_FILE_NAME)).await? else {
        println!("Monitor is not running");
        return Ok(());
    };
    let badge = snapshot.badge();
    println!("{} {} {}", badge.paint(), badge, snapshot.label());
    println!(
        "reachable: {}, locked: {}, day: {}",
        snapshot.reachable, snapshot.locked, snapshot.day
    );
    if let Some(problem) = &snapshot.problem {
        println!("problem: {problem}");
    }
    Ok(())
}
