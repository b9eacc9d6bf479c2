use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::daemon::storage::Session;

/// Change notifications pushed to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    TrackingStarted,
    TrackingStopped,
    SessionRecorded { session: Session },
}

/// Fan-out of [RecorderEvent]s. Publishing never waits for subscribers: every subscriber reads
/// from its own bounded queue and, when it falls behind, loses the oldest pending events.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<RecorderEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: RecorderEvent) {
        match self.sender.send(event) {
            Ok(count) => trace!("Notification sent to {count} subscribers"),
            Err(e) => debug!("No subscribers for {:?}", e.0),
        }
    }

    pub fn receiver(&self) -> EventReceiver {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Runs `handler` on a separate task for every event published from now on. The handler
    /// stops when the returned [Subscription] is dropped.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(RecorderEvent) + Send + 'static,
    {
        let mut receiver = self.receiver();
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.next().await {
                handler(event);
            }
        });
        Subscription { handle }
    }
}

pub struct EventReceiver {
    inner: broadcast::Receiver<RecorderEvent>,
}

impl EventReceiver {
    /// Waits for the next event. Returns `None` once the recorder is gone.
    pub async fn next(&mut self) -> Option<RecorderEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber fell behind, dropped {skipped} oldest notifications")
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
