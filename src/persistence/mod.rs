//! Persistence module for tracked events
//!
//! The aggregator and the signal batcher only talk to storage through the
//! traits below, so the backing engine can be swapped freely.

pub mod sqlite_store;

pub use sqlite_store::SqliteEventStore;

use crate::models::{Event, EventStatus};
use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Context serialization error: {0}")]
    Context(#[from] serde_json::Error),

    #[error("Invalid data in database: {0}")]
    InvalidData(String),

    #[error("Event {0} not found")]
    NotFound(i64),
}

/// Field change applied to a whole id list at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkUpdate {
    SetStatus(EventStatus),
    IncrementErrorCount,
}

/// Storage backend for events
pub trait EventStore: Send + Sync {
    /// Most recent event (by `last_event_date`) for an ip and scenario
    fn find_most_recent(&self, ip: &str, scenario: &str)
        -> Result<Option<Event>, PersistenceError>;

    /// Events in `status` whose error count is below `max_error_count`,
    /// oldest first
    fn find_pending(
        &self,
        status: EventStatus,
        max_error_count: u32,
    ) -> Result<Vec<Event>, PersistenceError>;

    /// Insert or update an event; the returned copy always carries an id
    fn save(&self, event: &Event) -> Result<Event, PersistenceError>;

    /// Apply `update` to every listed id atomically
    fn bulk_update_by_ids(&self, update: BulkUpdate, ids: &[i64]) -> Result<(), PersistenceError>;

    /// Point lookup
    fn find_by_id(&self, id: i64) -> Result<Option<Event>, PersistenceError>;
}

/// Durable timestamp of the last successful signal push
pub trait PushCursor: Send + Sync {
    fn last_push_timestamp(&self) -> Result<i64, PersistenceError>;

    fn set_last_push_timestamp(&self, timestamp: i64) -> Result<(), PersistenceError>;
}
