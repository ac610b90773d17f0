//! Embedded relational ledger backing
//!
//! Three id-only tables hold the publish outcomes and a single-row table,
//! pinned to id 0 by a check constraint, holds the two high-water marks.
//! Every update runs inside one transaction, so an interrupted run never
//! leaves a half-applied outcome behind.

use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::errors::{AppError, AppResult};
use crate::models::{format_timestamp, parse_timestamp};

use super::{default_epoch, IdSet, Memory, Stream};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS failed_to_create (
    id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS failed_to_modify (
    id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS created (
    id TEXT PRIMARY KEY
);

-- The check constraint keeps this table at exactly one row
CREATE TABLE IF NOT EXISTS latest (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    latest_created_date TEXT,
    latest_modified_date TEXT
);
";

/// Ledger backed by an embedded SQLite file.
#[derive(Debug)]
pub struct SqliteMemory {
    connection: Connection,
}

impl SqliteMemory {
    /// Open (or create) the ledger database and ensure its schema. A fresh
    /// database gets both high-water marks set to the default epoch.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let connection =
            Connection::open(path).map_err(|err| AppError::LedgerConnection {
                reason: err.to_string(),
            })?;
        connection.execute_batch(SCHEMA)?;

        let has_latest: bool =
            connection.query_row("SELECT EXISTS (SELECT 1 FROM latest)", [], |row| row.get(0))?;
        if !has_latest {
            let epoch = format_timestamp(default_epoch());
            debug!("Ledger table \"latest\" is empty, inserting default dates");
            connection.execute(
                "INSERT OR REPLACE INTO latest (id, latest_created_date, latest_modified_date)
                 VALUES (0, ?1, ?2)",
                params![epoch, epoch],
            )?;
        }

        Ok(Self { connection })
    }

    fn date_column(stream: Stream) -> &'static str {
        match stream {
            Stream::Created => "latest_created_date",
            Stream::Modified => "latest_modified_date",
        }
    }

    fn id_table(set: IdSet) -> &'static str {
        match set {
            IdSet::SuccessCreated => "created",
            IdSet::FailedCreated => "failed_to_create",
            IdSet::FailedModified => "failed_to_modify",
        }
    }
}

impl Memory for SqliteMemory {
    fn latest(&self, stream: Stream) -> AppResult<DateTime<Utc>> {
        let query = format!("SELECT {} FROM latest WHERE id = 0", Self::date_column(stream));
        let raw: String = self.connection.query_row(&query, [], |row| row.get(0))?;
        parse_timestamp(&raw)
    }

    fn set_latest(&mut self, stream: Stream, date: DateTime<Utc>) -> AppResult<()> {
        let statement = format!(
            "UPDATE latest SET {} = ?1 WHERE id = 0",
            Self::date_column(stream)
        );
        self.connection
            .execute(&statement, params![format_timestamp(date)])?;
        Ok(())
    }

    fn ids(&self, set: IdSet) -> AppResult<Vec<String>> {
        let query = format!("SELECT id FROM {} ORDER BY id", Self::id_table(set));
        let mut statement = self.connection.prepare(&query)?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    fn update_created(&mut self, success: &[String], failed: &[String]) -> AppResult<()> {
        let transaction = self.connection.transaction()?;
        for id in success {
            transaction.execute("DELETE FROM failed_to_create WHERE id = ?1", params![id])?;
        }
        for id in failed {
            transaction.execute("DELETE FROM created WHERE id = ?1", params![id])?;
            transaction.execute(
                "INSERT OR REPLACE INTO failed_to_create (id) VALUES (?1)",
                params![id],
            )?;
        }
        for id in success {
            transaction.execute(
                "INSERT OR REPLACE INTO created (id) VALUES (?1)",
                params![id],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn update_modified(&mut self, success: &[String], failed: &[String]) -> AppResult<()> {
        let transaction = self.connection.transaction()?;
        for id in success {
            transaction.execute("DELETE FROM failed_to_modify WHERE id = ?1", params![id])?;
        }
        // A record whose modification failed is no longer counted as
        // present; a successful retry puts it back.
        for id in failed {
            transaction.execute("DELETE FROM created WHERE id = ?1", params![id])?;
            transaction.execute(
                "INSERT OR REPLACE INTO failed_to_modify (id) VALUES (?1)",
                params![id],
            )?;
        }
        for id in success {
            transaction.execute(
                "INSERT OR REPLACE INTO created (id) VALUES (?1)",
                params![id],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn update_removed(&mut self, removed: &[String]) -> AppResult<()> {
        let transaction = self.connection.transaction()?;
        for id in removed {
            transaction.execute("DELETE FROM created WHERE id = ?1", params![id])?;
            transaction.execute("DELETE FROM failed_to_create WHERE id = ?1", params![id])?;
            transaction.execute("DELETE FROM failed_to_modify WHERE id = ?1", params![id])?;
        }
        transaction.commit()?;
        Ok(())
    }

    fn save(&mut self) -> AppResult<()> {
        // Updates commit their own transactions; nothing is buffered here.
        Ok(())
    }
}
