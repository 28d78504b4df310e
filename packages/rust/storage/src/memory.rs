//! In-process message sink for ephemeral runs.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ragline_shared::{EventId, PersistedEvent, RaglineError, Result};

use crate::MessageSink;

/// Keeps events in insertion order behind a mutex. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(EventId, PersistedEvent)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the live records, oldest first.
    pub fn records(&self) -> Vec<(EventId, PersistedEvent)> {
        self.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Snapshot of the live events, oldest first.
    pub fn events(&self) -> Vec<PersistedEvent> {
        self.records().into_iter().map(|(_, event)| event).collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<(EventId, PersistedEvent)>>> {
        self.records
            .lock()
            .map_err(|_| RaglineError::Storage("memory sink lock poisoned".into()))
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn insert(&self, event: &PersistedEvent) -> Result<EventId> {
        let id = EventId::generate();
        self.lock()?.push((id.clone(), event.clone()));
        Ok(id)
    }

    async fn delete(&self, id: &EventId) -> Result<()> {
        self.lock()?.retain(|(existing, _)| existing != id);
        Ok(())
    }

    async fn replace(&self, id: &EventId, event: &PersistedEvent) -> Result<EventId> {
        let mut records = self.lock()?;
        match records.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, slot)) => {
                *slot = event.clone();
                Ok(id.clone())
            }
            None => Err(RaglineError::Storage(format!("no record with id {id}"))),
        }
    }
}
