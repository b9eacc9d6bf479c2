use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{Stream, stream};
use tokio::time::Instant;
use tracing::{debug, error, instrument};

use crate::{
    daemon::error::{RecorderError, RecorderResult},
    utils::{clock::Clock, time::whole_seconds},
    window_api::WindowManager,
};

use super::afk::{AWAY_APP, AWAY_TASK, AfkEvaluator};

/// Single observation of the foreground activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub app: Arc<str>,
    pub task: Arc<str>,
}

/// Polls the window manager for the foreground (app, task) pair.
pub struct Sampler {
    producer: Box<dyn WindowManager>,
    afk_evaluator: AfkEvaluator,
    collection_frequency: Duration,
    time_provider: Arc<dyn Clock>,
}

impl Sampler {
    pub fn new(
        producer: Box<dyn WindowManager>,
        afk_evaluator: AfkEvaluator,
        collection_frequency: Duration,
        time_provider: Arc<dyn Clock>,
    ) -> Self {
        Self {
            producer,
            afk_evaluator,
            collection_frequency,
            time_provider,
        }
    }

    /// Takes one sample right now. While the user is idle past the threshold the away
    /// pseudo-activity is reported instead of the window.
    #[instrument(skip(self))]
    pub fn sample(&mut self) -> RecorderResult<Sample> {
        let idle_ms = self
            .producer
            .get_idle_time()
            .map_err(RecorderError::Sampling)?;
        let timestamp = whole_seconds(self.time_provider.time());

        if self.afk_evaluator.is_afk(idle_ms) {
            return Ok(Sample {
                timestamp,
                app: AWAY_APP.into(),
                task: AWAY_TASK.into(),
            });
        }

        let window_data = self
            .producer
            .get_active_window_data()
            .map_err(RecorderError::Sampling)?;
        Ok(Sample {
            timestamp,
            app: window_data.app,
            task: window_data.task,
        })
    }

    /// Lazy, endless sequence of samples taken every `collection_frequency`, starting
    /// immediately. A tick whose OS query fails is skipped and the next one is attempted on
    /// schedule. Each call starts a fresh sequence.
    pub fn samples(&mut self) -> impl Stream<Item = Sample> + Send + '_ {
        let first = self.time_provider.instant();
        stream::unfold((self, first), |(sampler, mut collection_point)| async move {
            loop {
                sampler.time_provider.sleep_until(collection_point).await;
                collection_point = next_point(collection_point, sampler.collection_frequency);

                match sampler.sample() {
                    Ok(sample) => {
                        debug!("Collected {:?}", sample);
                        return Some((sample, (sampler, collection_point)));
                    }
                    Err(e) => {
                        error!("Encountered an error during collection {:?}", e)
                    }
                }
            }
        })
    }
}

fn next_point(previous: Instant, frequency: Duration) -> Instant {
    previous + frequency
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::anyhow;
    use chrono::DateTime;
    use futures::StreamExt;

    use crate::{
        daemon::collection::afk::{AWAY_APP, AfkEvaluator},
        utils::{clock::TokioClock, logging::TEST_LOGGING},
        window_api::{ActiveWindowData, MockWindowManager},
    };

    use super::Sampler;

    fn window(app: &str, task: &str) -> ActiveWindowData {
        ActiveWindowData {
            app: app.into(),
            task: task.into(),
        }
    }

    fn sampler(manager: MockWindowManager) -> Sampler {
        Sampler::new(
            Box::new(manager),
            AfkEvaluator::from_seconds(60),
            Duration::from_secs(1),
            Arc::new(TokioClock::starting_at(DateTime::from_timestamp(0, 0).unwrap())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_follow_interval() {
        *TEST_LOGGING;
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(|| Ok(0));
        manager
            .expect_get_active_window_data()
            .returning(|| Ok(window("doc.txt", "write")));
        let mut sampler = sampler(manager);

        let samples = sampler.samples().take(3).collect::<Vec<_>>().await;

        let times = samples
            .iter()
            .map(|s| s.timestamp.timestamp())
            .collect::<Vec<_>>();
        assert_eq!(times, vec![0, 1, 2]);
        assert!(samples.iter().all(|s| &*s.app == "doc.txt" && &*s.task == "write"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_is_skipped() {
        *TEST_LOGGING;
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(|| Ok(0));
        let mut calls = 0;
        manager.expect_get_active_window_data().returning(move || {
            calls += 1;
            if calls == 2 {
                Err(anyhow!("window vanished"))
            } else {
                Ok(window("doc.txt", "write"))
            }
        });
        let mut sampler = sampler(manager);

        let samples = sampler.samples().take(2).collect::<Vec<_>>().await;

        let times = samples
            .iter()
            .map(|s| s.timestamp.timestamp())
            .collect::<Vec<_>>();
        assert_eq!(times, vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_user_is_reported_away() {
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(|| Ok(61_000));
        manager.expect_get_active_window_data().never();
        let mut sampler = sampler(manager);

        let sample = sampler.sample().unwrap();

        assert_eq!(&*sample.app, AWAY_APP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_restarts() {
        let mut manager = MockWindowManager::new();
        manager.expect_get_idle_time().returning(|| Ok(0));
        manager
            .expect_get_active_window_data()
            .returning(|| Ok(window("doc.txt", "write")));
        let mut sampler = sampler(manager);

        let first = sampler.samples().take(2).collect::<Vec<_>>().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let second = sampler.samples().take(1).collect::<Vec<_>>().await;

        assert_eq!(first.len(), 2);
        // Ticks at 0s and 1s, then a 10s pause. The new sequence samples immediately.
        assert_eq!(second[0].timestamp.timestamp(), 11);
    }
}
