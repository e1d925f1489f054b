use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::probe::{DEFAULT_PROBE_HOST, DEFAULT_PROBE_TIMEOUT};

use super::{MonitorConfig, DEFAULT_POLL_INTERVAL};

/// Options of the polling loop, shared by the daemon binary and `online-monitor serve`.
#[derive(clap::Args, Debug, Clone)]
pub struct MonitorArgs {
    #[arg(long, default_value = DEFAULT_PROBE_HOST, help = "Host pinged to decide whether the machine is online")]
    pub host: String,
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs(), help = "Seconds between polls")]
    pub interval: u64,
    #[arg(long = "probe-timeout", default_value_t = DEFAULT_PROBE_TIMEOUT.as_millis() as u64, help = "Milliseconds a ping may take")]
    pub probe_timeout: u64,
}

impl MonitorArgs {
    pub fn into_config(self, console_status: bool) -> MonitorConfig {
        MonitorConfig {
            host: self.host,
            poll_interval: Duration::from_secs(self.interval.max(1)),
            probe_timeout: Duration::from_millis(self.probe_timeout.max(1)),
            console_status,
        }
    }
}

#[derive(Parser)]
pub struct DaemonArgs {
  #[arg(long)]
  pub force: bool,
  #[arg(long)]
  pub dir: Option<PathBuf>,
  /// This option is for debugging purposes only.
  #[arg(long = "log-console")]
  pub log_console : bool,
  #[arg(long = "log-filter")]
  pub log: Option<LevelFilter>,
  #[command(flatten)]
  pub monitor: MonitorArgs,
}
