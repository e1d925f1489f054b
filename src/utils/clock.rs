use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio::time::Instant;

/// Represents an entity responsible for providing dates across application. This can allow it to
/// be used for testing
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    /// Calendar day used for rollover. Days follow the local timezone, so the counter resets at
    /// local midnight.
    fn today(&self) -> NaiveDate {
        self.time().with_timezone(&Local).date_naive()
    }

    fn instant(&self) -> Instant;

    async fn sleep_until(&self, instant: tokio::time::Instant);
}

#[derive(Clone, Copy)]
pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

#[cfg(test)]
pub use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
    use tokio::time::Instant;

    use super::Clock;

    /// Clock that only moves when told to. Wall time is treated as local time, so `today` is
    /// simply the date of the stored moment.
    #[derive(Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<NaiveDateTime>>,
    }

    impl ManualClock {
        pub fn new(start: NaiveDateTime) -> Self {
            Self {
                now: Arc::new(Mutex::new(start)),
            }
        }

        pub fn advance(&self, delta: TimeDelta) {
            *self.now.lock().unwrap() += delta;
        }

        pub fn set(&self, moment: NaiveDateTime) {
            *self.now.lock().unwrap() = moment;
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn time(&self) -> DateTime<Utc> {
            Utc.from_utc_datetime(&self.now.lock().unwrap())
        }

        fn today(&self) -> NaiveDate {
            self.now.lock().unwrap().date()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }
}
