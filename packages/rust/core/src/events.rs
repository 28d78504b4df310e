//! Event publication and run progress observation.

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use ragline_shared::{EventId, EventPayload, PersistedEvent, RunId};
use ragline_storage::MessageSink;

/// Progress callbacks for a run (CLI spinner, logs, tests).
pub trait RunObserver: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a source fetch settles, found or not.
    fn source_processed(&self, link: &Url, found: bool, processed: usize, total: usize);
    /// Called for every event the run publishes, including each answer update.
    fn published(&self, payload: &EventPayload);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn phase(&self, _name: &str) {}
    fn source_processed(&self, _link: &Url, _found: bool, _processed: usize, _total: usize) {}
    fn published(&self, _payload: &EventPayload) {}
}

/// Writes one run's events to the sink.
///
/// Sink failures are logged and absorbed: the caller gets `None` instead of
/// an identifier and the run carries on.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn MessageSink>,
    observer: Arc<dyn RunObserver>,
    run_id: RunId,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, observer: Arc<dyn RunObserver>, run_id: RunId) -> Self {
        Self {
            sink,
            observer,
            run_id,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn observer(&self) -> &dyn RunObserver {
        self.observer.as_ref()
    }

    /// Insert a new record.
    pub async fn publish(&self, payload: EventPayload) -> Option<EventId> {
        let event = PersistedEvent::new(self.run_id, payload);
        let result = self.sink.insert(&event).await;
        self.observer.published(&event.payload);

        match result {
            Ok(id) => {
                debug!(run_id = %self.run_id, kind = %event.kind(), %id, "event published");
                Some(id)
            }
            Err(e) => {
                warn!(run_id = %self.run_id, kind = %event.kind(), error = %e, "event insert failed");
                None
            }
        }
    }

    /// Remove record `id`. Returns whether the sink accepted the delete.
    pub async fn retract(&self, id: &EventId) -> bool {
        match self.sink.delete(id).await {
            Ok(()) => {
                debug!(run_id = %self.run_id, %id, "event retracted");
                true
            }
            Err(e) => {
                warn!(run_id = %self.run_id, %id, error = %e, "event delete failed");
                false
            }
        }
    }

    /// Replace record `id` with `payload`, or insert when there is no live record.
    ///
    /// `None` means the write failed. The old record may still be in the sink
    /// and must be retracted before inserting a successor.
    pub async fn republish(&self, id: Option<&EventId>, payload: EventPayload) -> Option<EventId> {
        let Some(id) = id else {
            return self.publish(payload).await;
        };

        let event = PersistedEvent::new(self.run_id, payload);
        let result = self.sink.replace(id, &event).await;
        self.observer.published(&event.payload);

        match result {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(run_id = %self.run_id, kind = %event.kind(), %id, error = %e, "event replace failed");
                None
            }
        }
    }
}
