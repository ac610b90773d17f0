//! Document-file ledger backing
//!
//! The whole ledger lives in one JSON file, loaded at open and rewritten on
//! `save`. Id sets are kept in memory as ordered sets and serialized as
//! arrays:
//!
//! ```json
//! {
//!   "latest": { "created": "...", "modified": "..." },
//!   "created": ["id", ...],
//!   "failed": { "created": ["id", ...], "modified": ["id", ...] }
//! }
//! ```

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::models::{format_timestamp, parse_timestamp};

use super::{default_epoch, IdSet, Memory, Stream};

#[derive(Debug, Serialize, Deserialize)]
struct LatestDates {
    #[serde(default = "epoch_string")]
    created: String,
    #[serde(default = "epoch_string")]
    modified: String,
}

impl Default for LatestDates {
    fn default() -> Self {
        Self {
            created: epoch_string(),
            modified: epoch_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FailedSets {
    #[serde(default)]
    created: BTreeSet<String>,
    #[serde(default)]
    modified: BTreeSet<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    latest: LatestDates,
    #[serde(default)]
    created: BTreeSet<String>,
    #[serde(default)]
    failed: FailedSets,
}

fn epoch_string() -> String {
    format_timestamp(default_epoch())
}

/// Ledger backed by a single JSON document file.
#[derive(Debug)]
pub struct JsonMemory {
    path: PathBuf,
    state: LedgerState,
}

impl JsonMemory {
    /// Load the ledger file, or start empty if the file does not exist yet.
    /// The parent directory must exist.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.is_file() {
            let content = fs::read_to_string(&path).map_err(|err| AppError::FileSystem {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            serde_json::from_str(&content)?
        } else {
            let parent_exists = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
                _ => true,
            };
            if !parent_exists {
                return Err(AppError::ConfigurationNotFound {
                    path: path.display().to_string(),
                });
            }
            debug!("Ledger file {:?} not found, starting empty", path);
            LedgerState::default()
        };

        Ok(Self { path, state })
    }
}

impl Memory for JsonMemory {
    fn latest(&self, stream: Stream) -> AppResult<DateTime<Utc>> {
        let raw = match stream {
            Stream::Created => &self.state.latest.created,
            Stream::Modified => &self.state.latest.modified,
        };
        parse_timestamp(raw)
    }

    fn set_latest(&mut self, stream: Stream, date: DateTime<Utc>) -> AppResult<()> {
        let slot = match stream {
            Stream::Created => &mut self.state.latest.created,
            Stream::Modified => &mut self.state.latest.modified,
        };
        *slot = format_timestamp(date);
        Ok(())
    }

    fn ids(&self, set: IdSet) -> AppResult<Vec<String>> {
        let ids = match set {
            IdSet::SuccessCreated => &self.state.created,
            IdSet::FailedCreated => &self.state.failed.created,
            IdSet::FailedModified => &self.state.failed.modified,
        };
        Ok(ids.iter().cloned().collect())
    }

    fn update_created(&mut self, success: &[String], failed: &[String]) -> AppResult<()> {
        for id in success {
            self.state.failed.created.remove(id);
        }
        for id in failed {
            self.state.created.remove(id);
        }
        self.state.failed.created.extend(failed.iter().cloned());
        self.state.created.extend(success.iter().cloned());
        Ok(())
    }

    fn update_modified(&mut self, success: &[String], failed: &[String]) -> AppResult<()> {
        for id in success {
            self.state.failed.modified.remove(id);
        }
        // A record whose modification failed is no longer counted as
        // present; a successful retry puts it back.
        for id in failed {
            self.state.created.remove(id);
        }
        self.state.failed.modified.extend(failed.iter().cloned());
        self.state.created.extend(success.iter().cloned());
        Ok(())
    }

    fn update_removed(&mut self, removed: &[String]) -> AppResult<()> {
        for id in removed {
            self.state.created.remove(id);
            self.state.failed.created.remove(id);
            self.state.failed.modified.remove(id);
        }
        Ok(())
    }

    fn save(&mut self) -> AppResult<()> {
        let content = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, content).map_err(|err| AppError::FileSystem {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        })?;
        debug!("Ledger saved to {:?}", self.path);
        Ok(())
    }
}
