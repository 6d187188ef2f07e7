//! SQLite implementation of the EventStore and PushCursor traits

use super::{BulkUpdate, EventStore, PersistenceError, PushCursor};
use crate::models::{Event, EventContext, EventStatus};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const EVENT_COLUMNS: &str =
    "id, ip, scenario, count, status_id, last_event_date, context, error_count";

const LAST_PUSH_KEY: &str = "last_push";

/// SQLite-based event storage
///
/// A single connection guarded by a mutex; every trait call is one short
/// statement or transaction.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

/// Row as stored, before status and context are decoded
struct RawEvent {
    id: i64,
    ip: String,
    scenario: String,
    count: u32,
    status_id: i64,
    last_event_date: i64,
    context: String,
    error_count: u32,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawEvent {
            id: row.get(0)?,
            ip: row.get(1)?,
            scenario: row.get(2)?,
            count: row.get(3)?,
            status_id: row.get(4)?,
            last_event_date: row.get(5)?,
            context: row.get(6)?,
            error_count: row.get(7)?,
        })
    }

    fn into_event(self) -> Result<Event, PersistenceError> {
        let status = EventStatus::from_i64(self.status_id).ok_or_else(|| {
            PersistenceError::InvalidData(format!(
                "Unknown status {} for event {}",
                self.status_id, self.id
            ))
        })?;
        let context: EventContext = if self.context.is_empty() {
            EventContext::new()
        } else {
            serde_json::from_str(&self.context)?
        };

        Ok(Event {
            id: Some(self.id),
            ip: self.ip,
            scenario: self.scenario,
            count: self.count,
            status,
            last_event_date: self.last_event_date,
            context,
            error_count: self.error_count,
        })
    }
}

impl SqliteEventStore {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        let store = SqliteEventStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteEventStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|_| PersistenceError::InvalidData("connection lock poisoned".to_string()))
    }

    /// Most recently touched events, newest first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Event>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events ORDER BY last_event_date DESC, id DESC LIMIT ?",
            EVENT_COLUMNS
        ))?;

        let raws = stmt
            .query_map(params![limit as i64], RawEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawEvent::into_event).collect()
    }
}

impl EventStore for SqliteEventStore {
    fn find_most_recent(
        &self,
        ip: &str,
        scenario: &str,
    ) -> Result<Option<Event>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE ip = ? AND scenario = ?
             ORDER BY last_event_date DESC, id DESC LIMIT 1",
            EVENT_COLUMNS
        ))?;

        let raw = stmt
            .query_row(params![ip, scenario], RawEvent::from_row)
            .optional()?;

        raw.map(RawEvent::into_event).transpose()
    }

    fn find_pending(
        &self,
        status: EventStatus,
        max_error_count: u32,
    ) -> Result<Vec<Event>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE status_id = ? AND error_count < ?
             ORDER BY last_event_date ASC, id ASC",
            EVENT_COLUMNS
        ))?;

        let raws = stmt
            .query_map(params![status.as_i64(), max_error_count], RawEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter().map(RawEvent::into_event).collect()
    }

    fn save(&self, event: &Event) -> Result<Event, PersistenceError> {
        let context = serde_json::to_string(&event.context)?;
        let conn = self.conn()?;

        let id = match event.id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE events SET ip = ?, scenario = ?, count = ?, status_id = ?,
                     last_event_date = ?, context = ?, error_count = ? WHERE id = ?",
                    params![
                        event.ip,
                        event.scenario,
                        event.count,
                        event.status.as_i64(),
                        event.last_event_date,
                        context,
                        event.error_count,
                        id
                    ],
                )?;
                if changed == 0 {
                    return Err(PersistenceError::NotFound(id));
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO events
                     (ip, scenario, count, status_id, last_event_date, context, error_count)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        event.ip,
                        event.scenario,
                        event.count,
                        event.status.as_i64(),
                        event.last_event_date,
                        context,
                        event.error_count
                    ],
                )?;
                conn.last_insert_rowid()
            }
        };

        let mut saved = event.clone();
        saved.id = Some(id);
        Ok(saved)
    }

    fn bulk_update_by_ids(&self, update: BulkUpdate, ids: &[i64]) -> Result<(), PersistenceError> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let (sql, values) = match update {
            BulkUpdate::SetStatus(status) => {
                let mut values = Vec::with_capacity(ids.len() + 1);
                values.push(status.as_i64());
                values.extend_from_slice(ids);
                (
                    format!("UPDATE events SET status_id = ? WHERE id IN ({})", placeholders),
                    values,
                )
            }
            BulkUpdate::IncrementErrorCount => (
                format!(
                    "UPDATE events SET error_count = error_count + 1 WHERE id IN ({})",
                    placeholders
                ),
                ids.to_vec(),
            ),
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(&sql, params_from_iter(values.iter()))?;
        tx.commit()?;
        Ok(())
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Event>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS))?;

        let raw = stmt.query_row(params![id], RawEvent::from_row).optional()?;
        raw.map(RawEvent::into_event).transpose()
    }
}

impl PushCursor for SqliteEventStore {
    fn last_push_timestamp(&self) -> Result<i64, PersistenceError> {
        let conn = self.conn()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM engine_state WHERE name = ?",
                params![LAST_PUSH_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    fn set_last_push_timestamp(&self, timestamp: i64) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO engine_state (name, value) VALUES (?, ?)",
            params![LAST_PUSH_KEY, timestamp],
        )?;
        Ok(())
    }
}
