//! Message sink and libSQL message history store.
//!
//! The pipeline publishes every event through the [`MessageSink`] trait.
//! Two implementations live here:
//! - [`Storage`]: Turso Embedded / libSQL database (`message_history` table)
//! - [`MemorySink`]: in-process, for ephemeral runs and tests
//!
//! **Access rules:** the CLI writes through [`Storage::open`]; read-only
//! consumers (history listing) may use [`Storage::open_readonly`].

mod memory;
mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, Row, params};
use ragline_shared::{EventId, EventKind, EventPayload, PersistedEvent, RaglineError, Result, RunId};
use tracing::{debug, instrument};

pub use memory::MemorySink;

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Destination for published pipeline events.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Persist a new record and return its identifier.
    async fn insert(&self, event: &PersistedEvent) -> Result<EventId>;

    /// Remove a record. Unknown identifiers are not an error.
    async fn delete(&self, id: &EventId) -> Result<()>;

    /// Replace the record `id` with `event`, returning the identifier of the
    /// live record afterwards.
    ///
    /// The default deletes then inserts, so the identifier changes. Stores
    /// that can update in place should override this and keep `id`.
    async fn replace(&self, id: &EventId, event: &PersistedEvent) -> Result<EventId> {
        self.delete(id).await?;
        self.insert(event).await
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A persisted event as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: EventId,
    pub event: PersistedEvent,
    pub created_at: String,
    pub updated_at: String,
}

impl HistoryEntry {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// One run as summarized in the history listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: RunId,
    /// The submitted query, if its event is still stored.
    pub query: Option<String>,
    pub started_at: String,
    pub event_count: u32,
}

// ---------------------------------------------------------------------------
// libSQL store
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RaglineError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without write access.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RaglineError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RaglineError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event writes
    // -----------------------------------------------------------------------

    /// Insert a new event row.
    pub async fn insert_event(&self, event: &PersistedEvent) -> Result<EventId> {
        self.check_writable()?;
        let id = EventId::generate();
        let payload = encode_payload(&event.payload)?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO message_history (id, run_id, kind, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    event.run_id.to_string(),
                    event.kind().as_str(),
                    payload,
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        debug!(%id, kind = %event.kind(), "event inserted");
        Ok(id)
    }

    /// Overwrite an event row in place, keeping its id and position.
    pub async fn update_event(&self, id: &EventId, event: &PersistedEvent) -> Result<()> {
        self.check_writable()?;
        let payload = encode_payload(&event.payload)?;
        let now = Utc::now().to_rfc3339();

        let changed = self
            .conn
            .execute(
                "UPDATE message_history
                 SET run_id = ?2, kind = ?3, payload = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    event.run_id.to_string(),
                    event.kind().as_str(),
                    payload,
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(RaglineError::Storage(format!("no record with id {id}")));
        }
        Ok(())
    }

    /// Delete one event row.
    pub async fn delete_event(&self, id: &EventId) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM message_history WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete every stored event. Returns the number of rows removed.
    pub async fn clear(&self) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM message_history", params![])
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Event reads
    // -----------------------------------------------------------------------

    /// The most recent `limit` events across all runs, oldest first.
    #[instrument(skip(self))]
    pub async fn list_events(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, run_id, payload, created_at, updated_at FROM (
                     SELECT seq, id, run_id, payload, created_at, updated_at
                     FROM message_history ORDER BY seq DESC LIMIT ?1
                 ) ORDER BY seq ASC",
                params![limit],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?
        {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    /// Every event of one run, in publication order.
    #[instrument(skip(self), fields(%run_id))]
    pub async fn list_run_events(&self, run_id: RunId) -> Result<Vec<HistoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, run_id, payload, created_at, updated_at
                 FROM message_history WHERE run_id = ?1 ORDER BY seq ASC",
                params![run_id.to_string()],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?
        {
            results.push(row_to_entry(&row)?);
        }
        Ok(results)
    }

    /// The most recent `limit` runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id,
                        MIN(created_at),
                        COUNT(*),
                        (SELECT payload FROM message_history q
                         WHERE q.run_id = m.run_id AND q.kind = 'Query'
                         ORDER BY q.seq LIMIT 1)
                 FROM message_history m
                 GROUP BY run_id
                 ORDER BY MIN(seq) DESC
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RaglineError::Storage(e.to_string()))?
        {
            let run_id = parse_run_id(&row.get::<String>(0).map_err(storage_err)?)?;
            let query = match row.get::<Option<String>>(3).map_err(storage_err)? {
                Some(json) => match decode_payload(&json)? {
                    EventPayload::Query(q) => Some(q),
                    _ => None,
                },
                None => None,
            };
            results.push(RunRecord {
                run_id,
                query,
                started_at: row.get::<String>(1).map_err(storage_err)?,
                event_count: row.get::<u32>(2).map_err(storage_err)?,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl MessageSink for Storage {
    async fn insert(&self, event: &PersistedEvent) -> Result<EventId> {
        self.insert_event(event).await
    }

    async fn delete(&self, id: &EventId) -> Result<()> {
        self.delete_event(id).await
    }

    async fn replace(&self, id: &EventId, event: &PersistedEvent) -> Result<EventId> {
        self.update_event(id, event).await?;
        Ok(id.clone())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_err(e: libsql::Error) -> RaglineError {
    RaglineError::Storage(e.to_string())
}

fn encode_payload(payload: &EventPayload) -> Result<String> {
    serde_json::to_string(payload)
        .map_err(|e| RaglineError::Storage(format!("failed to encode event: {e}")))
}

fn decode_payload(json: &str) -> Result<EventPayload> {
    serde_json::from_str(json)
        .map_err(|e| RaglineError::Storage(format!("corrupt event payload: {e}")))
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse()
        .map_err(|e| RaglineError::Storage(format!("corrupt run id {raw:?}: {e}")))
}

fn row_to_entry(row: &Row) -> Result<HistoryEntry> {
    let run_id = parse_run_id(&row.get::<String>(1).map_err(storage_err)?)?;
    let payload = decode_payload(&row.get::<String>(2).map_err(storage_err)?)?;

    Ok(HistoryEntry {
        id: EventId(row.get::<String>(0).map_err(storage_err)?),
        event: PersistedEvent::new(run_id, payload),
        created_at: row.get::<String>(3).map_err(storage_err)?,
        updated_at: row.get::<String>(4).map_err(storage_err)?,
    })
}
