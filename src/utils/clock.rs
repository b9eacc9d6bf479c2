use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock time and timers for the recorder. Sessions are stamped with
/// [Clock::time] while sampling cadence is driven by [Clock::instant], which lets tests swap in a
/// clock that follows tokio's paused time.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    fn instant(&self) -> Instant;

    async fn sleep_until(&self, instant: tokio::time::Instant);

    async fn sleep(&self, duration: Duration) {
        self.sleep_until(self.instant() + duration).await
    }
}

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

/// Wall clock anchored at a fixed date that advances together with tokio's (possibly paused)
/// time. Combined with `#[tokio::test(start_paused = true)]` this makes timing deterministic.
#[derive(Clone)]
pub struct TokioClock {
    start_time: DateTime<Utc>,
    reference: Instant,
}

impl TokioClock {
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn time(&self) -> DateTime<Utc> {
        self.start_time + self.reference.elapsed()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;

    use super::{Clock, TokioClock};

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(DateTime::from_timestamp(100, 0).unwrap());
        clock.sleep(Duration::from_secs(7)).await;
        assert_eq!(clock.time().timestamp(), 107);
    }
}
