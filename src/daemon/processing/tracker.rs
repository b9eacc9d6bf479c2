use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::daemon::{
    collection::sampler::Sample,
    storage::{Session, SessionId},
};

/// Folds samples into sessions. The tracker is `Idle` while no session is open and `Tracking`
/// while exactly one session is open.
#[derive(Debug, Default)]
pub struct SessionTracker {
    open: Option<Session>,
    /// Ids closed since the tracker last left `Idle`. The store upsert covers repeats across
    /// runs.
    closed: HashSet<SessionId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracking(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_session(&self) -> Option<&Session> {
        self.open.as_ref()
    }

    /// Applies a sample and returns the session it closed, if any.
    ///
    /// A sample of the open (app, task) pair only extends it, whatever the gap since the
    /// previous sample. A different pair closes the open session at the sample's timestamp and
    /// opens a new one starting there.
    pub fn observe(&mut self, sample: &Sample) -> Option<Session> {
        match self.open.as_mut() {
            Some(open) if open.same_activity(&sample.app, &sample.task) => {
                open.extend_to(sample.timestamp);
                None
            }
            Some(_) => {
                let closed = self.close_at(sample.timestamp);
                self.open_new(sample);
                closed
            }
            None => {
                self.closed.clear();
                self.open_new(sample);
                None
            }
        }
    }

    /// Closes the open session at `at`. Stopping an idle tracker does nothing.
    pub fn stop(&mut self, at: DateTime<Utc>) -> Option<Session> {
        self.close_at(at)
    }

    fn open_new(&mut self, sample: &Sample) {
        let session = Session::open(sample.app.clone(), sample.task.clone(), sample.timestamp);
        debug!("Opened session {}", session.id());
        self.open = Some(session);
    }

    fn close_at(&mut self, at: DateTime<Utc>) -> Option<Session> {
        let mut session = self.open.take()?;
        session.extend_to(at);
        if !self.closed.insert(session.id()) {
            warn!("Session {} was already closed, ignoring", session.id());
            return None;
        }
        debug!("Closed session {} after {}s", session.id(), session.duration.num_seconds());
        Some(session)
    }
}
