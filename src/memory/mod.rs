//! Durable sync ledger
//!
//! The ledger remembers, across runs, the high-water marks of the two
//! ingestion streams and the per-record publish outcomes: ids published
//! successfully, and ids whose last create or modify attempt failed and
//! must be retried. Two interchangeable backings implement the same
//! contract and are selected by the connection-string prefix: `sqlite:`
//! for the embedded relational file, `json:` for the self-contained
//! document file.

use chrono::{DateTime, TimeZone, Utc};

use crate::errors::{AppError, AppResult};

pub mod json;
pub mod sqlite;

pub use json::JsonMemory;
pub use sqlite::SqliteMemory;

/// First run default for both high-water marks.
pub fn default_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 10, 1, 0, 0, 0)
        .single()
        .expect("valid ledger epoch")
}

/// The two time-windowed ingestion streams tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Created,
    Modified,
}

/// The three id sets tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSet {
    SuccessCreated,
    FailedCreated,
    FailedModified,
}

/// Contract shared by the ledger backings.
///
/// After any update, `SuccessCreated` is disjoint from both failure sets,
/// and an id passed to `update_removed` is absent from all three.
pub trait Memory: std::fmt::Debug {
    /// High-water mark of a stream; the configured epoch before the first
    /// ingestion.
    fn latest(&self, stream: Stream) -> AppResult<DateTime<Utc>>;

    /// Advance a stream's high-water mark.
    fn set_latest(&mut self, stream: Stream, date: DateTime<Utc>) -> AppResult<()>;

    /// Snapshot of one id set.
    fn ids(&self, set: IdSet) -> AppResult<Vec<String>>;

    /// Record the outcome of a create pass: `success` ids leave the
    /// failed-create set and join the success set, `failed` ids join the
    /// failed-create set.
    fn update_created(&mut self, success: &[String], failed: &[String]) -> AppResult<()>;

    /// Record the outcome of a modify pass. A modify that succeeds counts
    /// the record as present, so `success` ids also join the success set.
    fn update_modified(&mut self, success: &[String], failed: &[String]) -> AppResult<()>;

    /// Forget ids whose source record is gone: removed from all three sets.
    fn update_removed(&mut self, removed: &[String]) -> AppResult<()>;

    /// Flush to durable storage.
    fn save(&mut self) -> AppResult<()>;
}

/// Instantiate the backing named by a connection string.
pub fn memory_from_connection_string(connection_string: &str) -> AppResult<Box<dyn Memory>> {
    if let Some(path) = connection_string.strip_prefix("sqlite:") {
        Ok(Box::new(SqliteMemory::open(path)?))
    } else if let Some(path) = connection_string.strip_prefix("json:") {
        Ok(Box::new(JsonMemory::open(path)?))
    } else {
        Err(AppError::LedgerConnectionString {
            connection_string: connection_string.to_string(),
        })
    }
}
