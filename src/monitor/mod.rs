use std::{path::PathBuf, time::Duration};

use activity::ActivityMonitor;
use anyhow::Result;
use storage::duration_store::{DurationStore, JsonDurationStore};
use timer::DurationTimer;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    fs::operations::InstanceLock,
    probe::{PingProbe, ReachabilityProbe},
    session::{GenericLockNotifier, LockFlag, LockNotifier, LockSubscription},
    status::{ConsoleStatus, StatusFile, StatusSurface, StatusSurfaces, STATUS_FILE_NAME},
    utils::clock::{Clock, DefaultClock},
};

pub mod activity;
pub mod args;
pub mod policy;
pub mod shutdown;
pub mod storage;
pub mod timer;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const INSTANCE_LOCK_FILE_NAME: &str = "monitor.lock";

/// Resolved settings of a monitor run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub host: String,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Print status changes to stdout as well.
    pub console_status: bool,
}

/// Represents the starting point for the monitor
pub async fn start_monitor(dir: PathBuf, config: MonitorConfig) -> Result<()> {
    let _instance = InstanceLock::acquire(&dir.join(INSTANCE_LOCK_FILE_NAME)).await?;

    let stop_request = dir.join(shutdown::STOP_REQUEST_FILE_NAME);
    // A request left over from a monitor that died before seeing it.
    if stop_request.exists() {
        warn!("Removing stale stop request {stop_request:?}");
        std::fs::remove_file(&stop_request)?;
    }

    let shutdown_token = CancellationToken::new();

    let mut surfaces: Vec<Box<dyn StatusSurface>> =
        vec![Box::new(StatusFile::new(dir.join(STATUS_FILE_NAME)))];
    if config.console_status {
        surfaces.push(Box::<ConsoleStatus>::default());
    }

    let monitor = create_monitor(
        JsonDurationStore::new(&dir)?,
        PingProbe::new(config.host.clone(), config.probe_timeout),
        GenericLockNotifier::new(),
        StatusSurfaces::new(surfaces),
        &shutdown_token,
        config.poll_interval,
        DefaultClock,
    );

    let (_, monitor_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone(), &stop_request),
        async {
            let result = monitor.run().await;
            // Lets the shutdown detection finish when the loop stopped on its own.
            shutdown_token.cancel();
            result
        },
    );

    if let Err(monitor_result) = &monitor_result {
        error!("Monitor got an error {:?}", monitor_result);
    }

    monitor_result
}

fn create_monitor<S: DurationStore>(
    store: S,
    probe: impl ReachabilityProbe + 'static,
    notifier: impl LockNotifier + 'static,
    status: StatusSurfaces,
    shutdown_token: &CancellationToken,
    poll_interval: Duration,
    clock: impl Clock + Clone,
) -> ActivityMonitor<S> {
    let lock_flag = LockFlag::default();
    let lock_subscription = LockSubscription::subscribe(Box::new(notifier), &lock_flag);

    ActivityMonitor::new(
        DurationTimer::new(store, Box::new(clock.clone())),
        Box::new(probe),
        lock_flag,
        lock_subscription,
        status,
        shutdown_token.clone(),
        poll_interval,
        Box::new(clock),
    )
}

#[cfg(test)]
mod monitor_tests {
    use std::{fs, time::Duration};

    use anyhow::{anyhow, Result};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        monitor::{
            create_monitor,
            storage::duration_store::{DurationStore, JsonDurationStore, LOG_FILE_NAME},
        },
        probe::MockReachabilityProbe,
        session::MockLockNotifier,
        status::{StatusFile, StatusSurfaces, STATUS_FILE_NAME},
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    /// Very simple smoke test to check if the monitor works end to end with a real clock. Lock
    /// detection fails here, so the session counts as unlocked.
    #[tokio::test]
    async fn smoke_test_monitor() -> Result<()> {
        *TEST_LOGGING;
        let mut probe = MockReachabilityProbe::new();
        probe.expect_is_reachable().returning(|| Ok(true));
        let mut notifier = MockLockNotifier::new();
        notifier
            .expect_subscribe()
            .returning(|_| Err(anyhow!("no lock screen here")));

        let dir = tempdir()?;
        let shutdown_token = CancellationToken::new();
        let monitor = create_monitor(
            JsonDurationStore::new(dir.path())?,
            probe,
            notifier,
            StatusSurfaces::new(vec![Box::new(StatusFile::new(
                dir.path().join(STATUS_FILE_NAME),
            ))]),
            &shutdown_token,
            Duration::from_millis(50),
            DefaultClock,
        );

        let (monitor_result, _) = tokio::join!(monitor.run(), async {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            shutdown_token.cancel()
        });
        monitor_result?;

        let files = fs::read_dir(dir.path())?
            .map(|v| v.map(|v| v.file_name()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(files, vec![LOG_FILE_NAME]);

        let storage = JsonDurationStore::new(dir.path())?;
        let log = storage.load().await;
        let total = log.values().map(|v| v.num_seconds()).sum::<i64>();
        assert!(total >= 1, "{log:?}");

        Ok(())
    }
}
