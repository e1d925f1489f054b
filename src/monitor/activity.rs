use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    probe::ReachabilityProbe,
    session::{LockFlag, LockSubscription},
    status::{StatusSnapshot, StatusSurfaces},
    utils::{
        clock::Clock,
        time::{format_duration, iso_week},
    },
};

use super::{policy::should_run, storage::duration_store::DurationStore, timer::DurationTimer};

/// Owns everything the polling loop works with. Nothing here is shared except the lock flag,
/// which the lock notifier writes.
pub struct ActivityMonitor<S: DurationStore> {
    timer: DurationTimer<S>,
    probe: Box<dyn ReachabilityProbe>,
    lock_flag: LockFlag,
    lock_subscription: LockSubscription,
    status: StatusSurfaces,
    shutdown: CancellationToken,
    poll_interval: Duration,
    clock: Box<dyn Clock>,
    problem: Option<String>,
}

impl<S: DurationStore> ActivityMonitor<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timer: DurationTimer<S>,
        probe: Box<dyn ReachabilityProbe>,
        lock_flag: LockFlag,
        lock_subscription: LockSubscription,
        status: StatusSurfaces,
        shutdown: CancellationToken,
        poll_interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            timer,
            probe,
            lock_flag,
            lock_subscription,
            status,
            shutdown,
            poll_interval,
            clock,
            problem: None,
        }
    }

    pub fn timer(&self) -> &DurationTimer<S> {
        &self.timer
    }

    /// One step of the loop: roll the day over, ask whether we are online, start or stop the
    /// timer and show the result.
    pub async fn poll_once(&mut self) -> StatusSnapshot {
        match self.timer.check_rollover().await {
            Ok(()) => self.problem = None,
            Err(e) => self.problem = Some(format!("Online time is not saved: {e}")),
        }

        let reachable = self.probe.is_reachable().await.unwrap_or_else(|e| {
            debug!("Reachability probe failed, counting as offline {e:?}");
            false
        });
        let locked = self.lock_flag.is_locked();

        let counting = should_run(reachable, locked);
        if counting {
            self.timer.start();
        } else {
            self.timer.stop();
        }

        let snapshot = self.snapshot(reachable, locked, counting);
        self.status.render(&snapshot).await;
        snapshot
    }

    fn snapshot(&self, reachable: bool, locked: bool, counting: bool) -> StatusSnapshot {
        let day = self.timer.current_day();
        StatusSnapshot {
            day,
            online: self.timer.get_duration(),
            week: iso_week(day),
            reachable,
            locked,
            counting,
            problem: self.problem.clone(),
            updated_at: self.clock.time(),
        }
    }

    /// Executes the polling loop until shutdown is requested, then stores the current day.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Monitoring every {:?}, lock detection {}",
            self.poll_interval,
            if self.lock_subscription.is_active() {
                "enabled"
            } else {
                "disabled"
            }
        );

        let mut poll_point = self.clock.instant();
        loop {
            poll_point += self.poll_interval;

            let snapshot = self
                .poll_once()
                .instrument(info_span!("Polling activity"))
                .await;
            debug!("Status {} counting={}", snapshot.label(), snapshot.counting);

            // After a suspend the schedule is far behind, polling every missed point is pointless.
            let now = self.clock.instant();
            if poll_point < now {
                poll_point = now;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(poll_point) => ()
            }
        }

        self.finish().await
    }

    /// Stores the day first, then lets go of the lock subscription and the status surfaces.
    async fn finish(mut self) -> Result<()> {
        let result = self.timer.flush().await;
        match &result {
            Ok(()) => info!(
                "Stored {} for {} on shutdown",
                format_duration(self.timer.get_duration()),
                self.timer.current_day()
            ),
            Err(e) => error!("Shutdown flush failed {e:?}"),
        }

        let ActivityMonitor {
            lock_subscription,
            status,
            ..
        } = self;
        drop(lock_subscription);
        drop(status);
        result
    }
}
