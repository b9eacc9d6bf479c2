use std::sync::Arc;

use anyhow::anyhow;
use chrono::Duration;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    utils::{
        clock::Clock,
        time::{format_duration, whole_seconds},
    },
    window_api::WindowManager,
};

use super::{
    collection::{
        afk::AfkEvaluator,
        sampler::{Sample, Sampler},
    },
    config::RecorderConfig,
    error::{RecorderError, RecorderResult},
    processing::{
        notify::{EventReceiver, Notifier, RecorderEvent, Subscription},
        tracker::SessionTracker,
    },
    storage::{DisplaySession, Session, SessionStore},
};

/// Sessions prepared for a viewer, together with their summed duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsView {
    pub sessions: Vec<DisplaySession>,
    pub total: String,
}

impl SessionsView {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        // Saturates: stored durations come from a file that may hold anything.
        let total = sessions
            .iter()
            .fold(0i64, |total, s| total.saturating_add(s.duration.num_seconds()));
        let total = Duration::try_seconds(total).unwrap_or(Duration::MAX);
        Self {
            sessions: sessions.iter().map(DisplaySession::from).collect(),
            total: format_duration(total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderStatus {
    pub tracking: bool,
    pub open_session: Option<Session>,
}

/// Owns the tracking state and coordinates the sampler, the tracker and the store.
///
/// Start and stop are serialized against each other. Samples are processed one at a time on a
/// dedicated task, and every store write happens under the same lock as tracker transitions.
pub struct RecorderService<S: SessionStore> {
    inner: Arc<Inner<S>>,
}

impl<S: SessionStore> Clone for RecorderService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<S> {
    control: Mutex<Control>,
    core: Mutex<Core>,
    store: S,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    checkpoint_interval: std::time::Duration,
}

struct Control {
    /// Parked while idle, moved into the sampling task while tracking.
    sampler: Option<Sampler>,
    active: Option<ActiveTracking>,
}

struct ActiveTracking {
    shutdown: CancellationToken,
    handle: JoinHandle<Sampler>,
}

struct Core {
    tracker: SessionTracker,
    /// Closed sessions not yet durably written. Retried on every following write.
    pending: Vec<Session>,
    last_checkpoint: Option<Instant>,
}

impl<S: SessionStore> RecorderService<S> {
    pub fn new(
        sampler: Sampler,
        store: S,
        clock: Arc<dyn Clock>,
        config: &RecorderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                control: Mutex::new(Control {
                    sampler: Some(sampler),
                    active: None,
                }),
                core: Mutex::new(Core {
                    tracker: SessionTracker::new(),
                    pending: vec![],
                    last_checkpoint: None,
                }),
                store,
                notifier: Notifier::new(config.event_capacity),
                clock,
                checkpoint_interval: config.checkpoint_interval,
            }),
        }
    }

    pub fn from_config(
        manager: Box<dyn WindowManager>,
        store: S,
        clock: Arc<dyn Clock>,
        config: &RecorderConfig,
    ) -> Self {
        let sampler = Sampler::new(
            manager,
            AfkEvaluator::new(config.afk_threshold),
            config.sample_interval,
            clock.clone(),
        );
        Self::new(sampler, store, clock, config)
    }

    /// Begins sampling. Fails with [RecorderError::AlreadyTracking] when tracking is running.
    pub async fn start(&self) -> RecorderResult<()> {
        let mut control = self.inner.control.lock().await;
        if control.active.is_some() {
            return Err(RecorderError::AlreadyTracking);
        }
        let sampler = control
            .sampler
            .take()
            .ok_or_else(|| RecorderError::Sampling(anyhow!("Sampler was lost by a failed run")))?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            sampling_loop(self.inner.clone(), sampler, shutdown.clone())
                .instrument(info_span!("Sampling")),
        );
        control.active = Some(ActiveTracking { shutdown, handle });

        info!("Tracking started");
        self.inner.notifier.publish(RecorderEvent::TrackingStarted);
        Ok(())
    }

    /// Ends sampling and durably writes the open session before returning. Fails with
    /// [RecorderError::NotTracking] when idle. A persistence failure is returned after tracking
    /// has stopped; the unwritten session is kept and retried on the next write.
    pub async fn stop(&self) -> RecorderResult<()> {
        let mut control = self.inner.control.lock().await;
        let Some(active) = control.active.take() else {
            return Err(RecorderError::NotTracking);
        };

        active.shutdown.cancel();
        match active.handle.await {
            Ok(sampler) => control.sampler = Some(sampler),
            Err(e) => error!("Sampling task failed {e:?}"),
        }

        let result = {
            let mut core = self.inner.core.lock().await;
            let now = whole_seconds(self.inner.clock.time());
            if let Some(closed) = core.tracker.stop(now) {
                core.pending.push(closed);
            }
            core.last_checkpoint = None;
            self.inner.flush_pending(&mut core).await
        };

        info!("Tracking stopped");
        self.inner.notifier.publish(RecorderEvent::TrackingStopped);
        result
    }

    /// Stops tracking if it is running. Used when the daemon exits.
    pub async fn shutdown(&self) -> RecorderResult<()> {
        match self.stop().await {
            Err(RecorderError::NotTracking) => Ok(()),
            result => result,
        }
    }

    /// Every stored session, in the order they were first recorded.
    pub async fn sessions(&self) -> RecorderResult<Vec<Session>> {
        self.inner.store.snapshot().await
    }

    /// Stored sessions prepared for display.
    pub async fn query(&self) -> RecorderResult<SessionsView> {
        let sessions = self.sessions().await?;
        Ok(SessionsView::from_sessions(&sessions))
    }

    pub async fn status(&self) -> RecorderStatus {
        let tracking = self.inner.control.lock().await.active.is_some();
        let open_session = self.inner.core.lock().await.tracker.open_session().cloned();
        RecorderStatus {
            tracking,
            open_session,
        }
    }

    /// Calls `handler` for every start, stop and recorded session. The handler runs on its own
    /// task, so a slow handler never delays sampling.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(RecorderEvent) + Send + 'static,
    {
        self.inner.notifier.subscribe(handler)
    }

    pub fn events(&self) -> EventReceiver {
        self.inner.notifier.receiver()
    }
}

impl<S: SessionStore> Inner<S> {
    async fn process_sample(&self, sample: Sample) {
        let mut core = self.core.lock().await;
        if let Some(closed) = core.tracker.observe(&sample) {
            core.pending.push(closed);
            if let Err(e) = self.flush_pending(&mut core).await {
                error!("Failed to record session, will retry {e}");
            }
        }
        self.maybe_checkpoint(&mut core).await;
    }

    /// Writes pending sessions and announces them once the write succeeded.
    async fn flush_pending(&self, core: &mut Core) -> RecorderResult<()> {
        if core.pending.is_empty() {
            return Ok(());
        }
        self.store.append_or_update(&core.pending).await?;
        for session in core.pending.drain(..) {
            debug!("Recorded session {}", session.id());
            self.notifier
                .publish(RecorderEvent::SessionRecorded { session });
        }
        Ok(())
    }

    /// Periodically writes the open session so a crash loses at most one checkpoint interval.
    async fn maybe_checkpoint(&self, core: &mut Core) {
        let now = self.clock.instant();
        let due = core
            .last_checkpoint
            .map_or(true, |last| now.duration_since(last) >= self.checkpoint_interval);
        if !due {
            return;
        }
        core.last_checkpoint = Some(now);

        if let Err(e) = self.flush_pending(core).await {
            warn!("Retrying pending sessions failed {e}");
        }
        let Some(open) = core.tracker.open_session().cloned() else {
            return;
        };
        match self.store.append_or_update(&[open]).await {
            Ok(()) => debug!("Checkpointed open session"),
            Err(e) => warn!("Checkpoint failed {e}"),
        }
    }
}

/// Serializes ticks: a sample is fully processed before the next one is taken. Returns the
/// sampler so that tracking can be restarted.
async fn sampling_loop<S: SessionStore>(
    inner: Arc<Inner<S>>,
    mut sampler: Sampler,
    shutdown: CancellationToken,
) -> Sampler {
    {
        let samples = sampler.samples();
        futures::pin_mut!(samples);
        loop {
            let sample = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                sample = samples.next() => sample,
            };
            let Some(sample) = sample else {
                break;
            };
            inner.process_sample(sample).await;
        }
    }
    sampler
}
