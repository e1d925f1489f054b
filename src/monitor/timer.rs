use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::utils::{clock::Clock, time::format_duration};

use super::storage::{duration_store::DurationStore, entities::DailyRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Stopped,
    Running { since: DateTime<Utc> },
}

/// Accumulates online time of the current day. Only the rollover and the final flush touch the
/// store, everything else is in memory.
pub struct DurationTimer<S: DurationStore> {
    state: TimerState,
    accumulated: TimeDelta,
    current_day: NaiveDate,
    /// Finished days whose write failed. They are retried on every rollover check.
    pending: Vec<DailyRecord>,
    store: S,
    clock: Box<dyn Clock>,
}

impl<S: DurationStore> DurationTimer<S> {
    pub fn new(store: S, clock: Box<dyn Clock>) -> Self {
        Self {
            state: TimerState::Stopped,
            accumulated: TimeDelta::zero(),
            current_day: clock.today(),
            pending: Vec::new(),
            store,
            clock,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn current_day(&self) -> NaiveDate {
        self.current_day
    }

    pub fn pending_flushes(&self) -> usize {
        self.pending.len()
    }

    pub fn start(&mut self) {
        if let TimerState::Stopped = self.state {
            let since = self.clock.time();
            debug!("Timer started at {since}");
            self.state = TimerState::Running { since };
        }
    }

    pub fn stop(&mut self) {
        if let TimerState::Running { since } = self.state {
            let now = self.clock.time();
            self.accumulated += span(since, now);
            self.state = TimerState::Stopped;
            debug!("Timer stopped, {} today", format_duration(self.accumulated));
        }
    }

    pub fn get_duration(&self) -> TimeDelta {
        self.duration_at(self.clock.time())
    }

    fn duration_at(&self, now: DateTime<Utc>) -> TimeDelta {
        match self.state {
            TimerState::Stopped => self.accumulated,
            TimerState::Running { since } => self.accumulated + span(since, now),
        }
    }

    /// Moves the timer to the next day when the date changed since the last check, storing the
    /// finished day. Time counted before the switch stays with the old day.
    ///
    /// The timer rolls over even when storing fails. The finished day is then kept and written
    /// on a later call.
    pub async fn check_rollover(&mut self) -> Result<()> {
        let retried = self.retry_pending().await;

        let today = self.clock.today();
        if today == self.current_day {
            return retried;
        }

        let now = self.clock.time();
        let finished = DailyRecord {
            date: self.current_day,
            duration: self.duration_at(now),
        };
        info!(
            "Day changed from {} to {today}, {} online",
            self.current_day,
            format_duration(finished.duration)
        );

        self.accumulated = TimeDelta::zero();
        self.current_day = today;
        if let TimerState::Running { .. } = self.state {
            self.state = TimerState::Running { since: now };
        }

        match self
            .store
            .upsert(finished.date, finished.duration)
            .await
        {
            Ok(()) => retried,
            Err(e) => {
                error!("Failed to store {} {e:?}", finished.date);
                self.pending.push(finished);
                Err(e)
            }
        }
    }

    async fn retry_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut failed = Vec::new();
        for record in std::mem::take(&mut self.pending) {
            if let Err(e) = self.store.upsert(record.date, record.duration).await {
                warn!("Still can't store {} {e:?}", record.date);
                failed.push(record);
            }
        }

        let left = failed.len();
        self.pending = failed;
        if left == 0 {
            info!("Stored every postponed day");
            Ok(())
        } else {
            Err(anyhow!("{left} finished day(s) are waiting to be stored"))
        }
    }

    /// Stops counting and stores the current day together with anything still pending.
    pub async fn flush(&mut self) -> Result<()> {
        self.stop();
        let retried = self.retry_pending().await;
        self.store
            .upsert(self.current_day, self.accumulated)
            .await
            .inspect_err(|e| error!("Failed to store {} on shutdown {e:?}", self.current_day))?;
        retried
    }
}

/// Elapsed time between two readings. A clock moved backwards counts as nothing.
fn span(since: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    (now - since).max(TimeDelta::zero())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    use anyhow::{anyhow, Result};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
    use tempfile::tempdir;

    use crate::{
        monitor::storage::{
            duration_store::{DurationStore, JsonDurationStore},
            entities::DurationLog,
        },
        utils::clock::ManualClock,
    };

    use super::DurationTimer;

    const D1: NaiveDate = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
    const D2: NaiveDate = NaiveDate::from_ymd_opt(2018, 7, 5).unwrap();

    /// Store kept in memory that can be told to fail.
    #[derive(Default)]
    struct MemoryStore {
        log: Mutex<DurationLog>,
        writes: Mutex<Vec<(NaiveDate, TimeDelta)>>,
        failing: AtomicBool,
    }

    impl DurationStore for MemoryStore {
        async fn load(&self) -> DurationLog {
            self.log.lock().unwrap().clone()
        }

        async fn upsert(&self, date: NaiveDate, duration: TimeDelta) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("disk is full"));
            }
            self.writes.lock().unwrap().push((date, duration));
            self.log.lock().unwrap().insert(date, duration);
            Ok(())
        }
    }

    fn setup(start: NaiveDateTime) -> (DurationTimer<Arc<MemoryStore>>, ManualClock, Arc<MemoryStore>) {
        let clock = ManualClock::new(start);
        let store = Arc::new(MemoryStore::default());
        let timer = DurationTimer::new(store.clone(), Box::new(clock.clone()));
        (timer, clock, store)
    }

    fn morning() -> NaiveDateTime {
        NaiveDateTime::new(D1, NaiveTime::from_hms_opt(9, 0, 0).unwrap())
    }

    #[test]
    fn test_starts_stopped() {
        let (timer, _, _) = setup(morning());

        assert!(!timer.is_running());
        assert_eq!(timer.current_day(), D1);
        assert_eq!(timer.get_duration(), TimeDelta::zero());
    }

    #[test]
    fn test_sums_running_spans() {
        let (mut timer, clock, _) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(10));
        assert_eq!(timer.get_duration(), TimeDelta::seconds(10));
        timer.stop();

        clock.advance(TimeDelta::seconds(100));
        assert_eq!(timer.get_duration(), TimeDelta::seconds(10));

        timer.start();
        clock.advance(TimeDelta::seconds(7));
        timer.stop();

        assert_eq!(timer.get_duration(), TimeDelta::seconds(17));
    }

    #[test]
    fn test_repeated_start_and_stop_are_noops() {
        let (mut timer, clock, _) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(3));
        timer.start();
        clock.advance(TimeDelta::seconds(2));
        timer.stop();
        timer.stop();
        clock.advance(TimeDelta::seconds(50));
        timer.stop();

        assert_eq!(timer.get_duration(), TimeDelta::seconds(5));
    }

    #[test]
    fn test_clock_moving_backwards_counts_nothing() {
        let (mut timer, clock, _) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(-30));
        assert_eq!(timer.get_duration(), TimeDelta::zero());
        timer.stop();
        assert_eq!(timer.get_duration(), TimeDelta::zero());
    }

    #[tokio::test]
    async fn test_rollover_same_day_is_noop() -> Result<()> {
        let (mut timer, clock, store) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(10));
        timer.check_rollover().await?;

        assert!(timer.is_running());
        assert_eq!(timer.current_day(), D1);
        assert_eq!(timer.get_duration(), TimeDelta::seconds(10));
        assert!(store.writes.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rollover_while_stopped() -> Result<()> {
        let (mut timer, clock, store) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(42));
        timer.stop();
        clock.set(NaiveDateTime::new(D2, NaiveTime::from_hms_opt(0, 0, 3).unwrap()));

        timer.check_rollover().await?;

        assert_eq!(*store.writes.lock().unwrap(), vec![(D1, TimeDelta::seconds(42))]);
        assert!(!timer.is_running());
        assert_eq!(timer.current_day(), D2);
        assert_eq!(timer.get_duration(), TimeDelta::zero());

        timer.check_rollover().await?;
        assert_eq!(store.writes.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_day_change_mid_interval() -> Result<()> {
        let (mut timer, clock, store) = setup(NaiveDateTime::new(
            D1,
            NaiveTime::from_hms_opt(23, 59, 40).unwrap(),
        ));

        timer.start();
        clock.advance(TimeDelta::seconds(10));
        timer.stop();
        assert_eq!(timer.get_duration(), TimeDelta::seconds(10));

        timer.start();
        clock.advance(TimeDelta::seconds(15));
        timer.check_rollover().await?;

        assert_eq!(*store.writes.lock().unwrap(), vec![(D1, TimeDelta::seconds(25))]);
        assert!(timer.is_running());
        assert_eq!(timer.current_day(), D2);
        assert_eq!(timer.get_duration(), TimeDelta::zero());

        clock.advance(TimeDelta::seconds(4));
        assert_eq!(timer.get_duration(), TimeDelta::seconds(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_rollover_is_retried() -> Result<()> {
        let (mut timer, clock, store) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(30));
        store.failing.store(true, Ordering::SeqCst);
        clock.set(NaiveDateTime::new(D2, NaiveTime::from_hms_opt(8, 0, 0).unwrap()));

        assert!(timer.check_rollover().await.is_err());
        assert_eq!(timer.current_day(), D2);
        assert_eq!(timer.pending_flushes(), 1);

        assert!(timer.check_rollover().await.is_err());
        assert_eq!(timer.pending_flushes(), 1);

        store.failing.store(false, Ordering::SeqCst);
        timer.check_rollover().await?;

        assert_eq!(timer.pending_flushes(), 0);
        assert_eq!(*store.writes.lock().unwrap(), vec![(D1, TimeDelta::seconds(30))]);
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_stores_partial_day() -> Result<()> {
        let (mut timer, clock, store) = setup(morning());

        timer.start();
        clock.advance(TimeDelta::seconds(61));
        timer.flush().await?;

        assert!(!timer.is_running());
        assert_eq!(store.load().await[&D1], TimeDelta::seconds(61));
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_stores_idle_day() -> Result<()> {
        let (mut timer, _clock, store) = setup(morning());

        timer.stop();
        timer.flush().await?;

        assert!(!timer.is_running());
        assert_eq!(*store.writes.lock().unwrap(), vec![(D1, TimeDelta::zero())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_day_change_end_to_end_with_file() -> Result<()> {
        let dir = tempdir()?;
        let clock = ManualClock::new(NaiveDateTime::new(
            D1,
            NaiveTime::from_hms_opt(23, 59, 45).unwrap(),
        ));
        let store = Arc::new(JsonDurationStore::new(dir.path())?);
        let mut timer = DurationTimer::new(store.clone(), Box::new(clock.clone()));

        timer.start();
        clock.advance(TimeDelta::seconds(10));
        timer.stop();
        assert_eq!(timer.get_duration(), TimeDelta::seconds(10));

        timer.start();
        clock.advance(TimeDelta::seconds(5));
        timer.check_rollover().await?;

        let text = tokio::fs::read_to_string(store.path()).await?;
        assert!(text.contains("\"2018-07-04\": \"00:00:15\""));
        assert!(timer.is_running());
        assert_eq!(timer.current_day(), D2);
        assert_eq!(timer.get_duration(), TimeDelta::zero());
        Ok(())
    }
}
