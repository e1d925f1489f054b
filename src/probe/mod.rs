//! Network reachability checks. [PingProbe] is the implementation used by the monitor, it asks
//! the system `ping` to send a single echo request.

use std::{process::Stdio, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

pub const DEFAULT_PROBE_HOST: &str = "8.8.8.8";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Answers whether the machine is currently online.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Errors mean the answer is unknown. Callers treat that as offline.
    async fn is_reachable(&self) -> Result<bool>;
}

pub struct PingProbe {
    host: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        let host = host.into();
        Self {
            program: "ping".into(),
            args: ping_args(&host, timeout),
            host,
            timeout,
        }
    }

    /// Runs `program` instead of `ping`. Exit status zero means reachable.
    pub fn with_program(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        timeout: Duration,
    ) -> Self {
        let program = program.into();
        Self {
            host: program.clone(),
            program,
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    if cfg!(windows) {
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            timeout.as_millis().to_string(),
            host.into(),
        ]
    } else {
        // -W only takes whole seconds
        let wait = timeout.as_secs_f64().ceil().max(1.) as u64;
        vec![
            "-c".into(),
            "1".into(),
            "-W".into(),
            wait.to_string(),
            host.into(),
        ]
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    #[instrument(skip(self), fields(host = %self.host))]
    async fn is_reachable(&self) -> Result<bool> {
        let mut command = self.command();
        let status = tokio::time::timeout(self.timeout, command.status())
            .await
            .map_err(|_| anyhow!("Ping didn't finish in {:?}", self.timeout))??;
        debug!("Ping exited with {status}");
        Ok(status.success())
    }
}
