//! Catalog sync driver
//!
//! One run executes five phases in strict order, each followed by a ledger
//! save: retry failed creations, ingest new creations month by month, retry
//! failed modifications, ingest modifications, and reconcile source-side
//! deletions. Login and platform registration gate the run; their failure
//! aborts before any phase starts.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use log::{debug, info, warn};

use crate::aiod::CatalogApi;
use crate::bridge::Bridge;
use crate::errors::{AppError, AppResult};
use crate::memory::{IdSet, Memory, Stream};
use crate::models::SourceRecord;
use crate::source::SourceApi;

/// Drives one synchronization run from the source catalog into the
/// destination.
pub struct CatalogSync<S: SourceApi, C: CatalogApi> {
    source: S,
    bridge: Bridge<C>,
    memory: Box<dyn Memory>,
}

impl<S: SourceApi, C: CatalogApi> CatalogSync<S, C> {
    pub fn new(source: S, bridge: Bridge<C>, memory: Box<dyn Memory>) -> Self {
        Self {
            source,
            bridge,
            memory,
        }
    }

    /// Execute one full run. An empty `access_token` lets the destination
    /// client acquire its own.
    pub fn run(&mut self, access_token: &str) -> AppResult<()> {
        if !self.bridge.check_login(access_token) {
            return Err(AppError::authentication(
                "could not login to the destination catalog",
            ));
        }
        if !self.bridge.check_platform() {
            return Err(AppError::internal(
                "could not register the platform on the destination catalog",
            ));
        }

        // Convert the assets that failed to upload the last time
        self.retry_failed_created()?;
        self.memory.save()?;

        // Convert assets created after the last run
        self.ingest_created()?;
        self.memory.save()?;

        // Convert the assets whose modification failed the last time
        self.retry_failed_modified()?;
        self.memory.save()?;

        // Convert assets modified after the last run
        self.ingest_modified()?;
        self.memory.save()?;

        // Check if previously published assets have been deleted
        self.check_deletion()?;
        self.memory.save()?;

        Ok(())
    }

    fn convert_record(
        &self,
        record: &SourceRecord,
        success: &mut Vec<String>,
        failed: &mut Vec<String>,
    ) {
        let Some(asset_id) = record.id().map(str::to_string) else {
            warn!("Skipping a source record with no _id");
            return;
        };
        debug!("Converting asset {}", asset_id);

        let Some(asset_type) = record.asset_type() else {
            warn!("Asset {} carries no aitype", asset_id);
            failed.push(asset_id);
            return;
        };

        if self.bridge.convert_asset(record, &asset_type) {
            debug!("Successfully converted asset {}", asset_id);
            success.push(asset_id);
        } else {
            failed.push(asset_id);
        }
    }

    fn retry_failed_created(&mut self) -> AppResult<()> {
        let mut success = Vec::new();
        let mut failed = Vec::new();
        debug!("Converting assets that previously failed to create");
        for asset_id in self.memory.ids(IdSet::FailedCreated)? {
            match self.source.get_by_id(&asset_id) {
                Some(record) => self.convert_record(&record, &mut success, &mut failed),
                None => {
                    debug!("Failed to download asset {} from the source", asset_id);
                    failed.push(asset_id);
                }
            }
        }
        self.memory.update_created(&success, &failed)
    }

    fn retry_failed_modified(&mut self) -> AppResult<()> {
        let mut success = Vec::new();
        let mut failed = Vec::new();
        debug!("Converting assets that previously failed to modify");
        for asset_id in self.memory.ids(IdSet::FailedModified)? {
            match self.source.get_by_id(&asset_id) {
                Some(record) => self.convert_record(&record, &mut success, &mut failed),
                None => {
                    debug!("Failed to download asset {} from the source", asset_id);
                    failed.push(asset_id);
                }
            }
        }
        self.memory.update_modified(&success, &failed)
    }

    fn ingest_created(&mut self) -> AppResult<()> {
        self.ingest_created_until(Utc::now())
    }

    fn ingest_created_until(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        let mut success = Vec::new();
        let mut failed = Vec::new();
        let start = self.memory.latest(Stream::Created)?;
        debug!("Converting all created assets from {}", start);

        for (window_start, window_end) in month_windows(start, now) {
            debug!(
                "Requesting assets created between {} and {}",
                window_start, window_end
            );
            for record in self.source.get_created(window_start, window_end) {
                self.convert_record(&record, &mut success, &mut failed);
            }
            self.memory
                .set_latest(Stream::Created, window_end.min(now))?;
        }

        self.memory.update_created(&success, &failed)
    }

    fn ingest_modified(&mut self) -> AppResult<()> {
        self.ingest_modified_until(Utc::now())
    }

    fn ingest_modified_until(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        let mut success = Vec::new();
        let mut failed = Vec::new();
        let start = self.memory.latest(Stream::Modified)?;
        debug!("Converting all modified assets from {}", start);

        for (window_start, window_end) in month_windows(start, now) {
            debug!(
                "Requesting assets modified between {} and {}",
                window_start, window_end
            );
            for record in self.source.get_changed(window_start, window_end) {
                // A changed date equal to the created date means the record
                // has never actually been modified.
                if record.is_unmodified() {
                    info!(
                        "Asset {} has not been modified since creation",
                        record.id().unwrap_or("<missing _id>")
                    );
                    continue;
                }
                self.convert_record(&record, &mut success, &mut failed);
            }
            self.memory
                .set_latest(Stream::Modified, window_end.min(now))?;
        }

        self.memory.update_modified(&success, &failed)
    }

    fn check_deletion(&mut self) -> AppResult<()> {
        let mut removed = Vec::new();
        debug!("Checking if any published asset has been deleted from the source");
        for asset_id in self.memory.ids(IdSet::SuccessCreated)? {
            if self.source.get_by_id(&asset_id).is_some() {
                debug!("Asset {} has not been deleted", asset_id);
                continue;
            }
            if self.bridge.delete_asset(&asset_id) {
                debug!("Asset {} has been removed from the destination", asset_id);
                removed.push(asset_id);
            } else {
                debug!("Could not remove asset {} from the destination", asset_id);
            }
        }
        self.memory.update_removed(&removed)
    }
}

/// First day of the month after `date`, at midnight.
fn next_month(date: DateTime<Utc>) -> DateTime<Utc> {
    let mut year = date.year();
    let mut month = date.month() + 1;
    if month > 12 {
        year += 1;
        month = 1;
    }
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first day of a month is a valid datetime")
}

/// Calendar-month ingestion windows `(start, start+1mo]` from `start` until
/// the window containing `now`, oldest first. Empty when `start` is already
/// past `now`.
fn month_windows(start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut window_start = start;
    while window_start <= now {
        let window_end = next_month(window_start);
        windows.push((window_start, window_end));
        window_start = window_end;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aiod::{ApiResult, MockCatalogApi};
    use crate::config::BridgeConfig;
    use crate::memory::JsonMemory;
    use crate::source::MockSourceApi;
    use mockall::predicate::eq;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn timestamp(value: &str) -> DateTime<Utc> {
        crate::models::parse_timestamp(value).unwrap()
    }

    #[test]
    fn test_next_month_rolls_over_year() {
        assert_eq!(
            next_month(timestamp("2024-12-15T10:00:00.000000Z")),
            timestamp("2025-01-01T00:00:00.000000Z")
        );
        assert_eq!(
            next_month(timestamp("2024-01-15T00:00:00.000000Z")),
            timestamp("2024-02-01T00:00:00.000000Z")
        );
    }

    #[test]
    fn test_month_windows_cover_start_to_now() {
        let windows = month_windows(
            timestamp("2024-01-15T00:00:00.000000Z"),
            timestamp("2024-03-10T00:00:00.000000Z"),
        );
        assert_eq!(
            windows,
            vec![
                (
                    timestamp("2024-01-15T00:00:00.000000Z"),
                    timestamp("2024-02-01T00:00:00.000000Z")
                ),
                (
                    timestamp("2024-02-01T00:00:00.000000Z"),
                    timestamp("2024-03-01T00:00:00.000000Z")
                ),
                (
                    timestamp("2024-03-01T00:00:00.000000Z"),
                    timestamp("2024-04-01T00:00:00.000000Z")
                ),
            ]
        );
    }

    #[test]
    fn test_month_windows_empty_when_caught_up() {
        let windows = month_windows(
            timestamp("2024-05-01T00:00:00.000000Z"),
            timestamp("2024-04-20T00:00:00.000000Z"),
        );
        assert!(windows.is_empty());
    }

    // -------------------------------------------------------------------------
    // Driver fixtures
    // -------------------------------------------------------------------------

    fn write_config_folder(dir: &Path) {
        fs::write(
            dir.join("type_to_aiod_endpoint.json"),
            json!({"ai_service": "services"}).to_string(),
        )
        .unwrap();
        fs::write(
            dir.join("platform.json"),
            json!({"name": "portal", "identifier": 3}).to_string(),
        )
        .unwrap();
        let translators = dir.join("translators");
        fs::create_dir_all(&translators).unwrap();
        fs::write(
            translators.join("ai_service.json"),
            json!({
                "platform_resource_identifier": "$/_id",
                "name": "$/_source/title"
            })
            .to_string(),
        )
        .unwrap();
    }

    struct Fixture {
        _config_dir: tempfile::TempDir,
        _memory_dir: tempfile::TempDir,
        memory_path: std::path::PathBuf,
        sync: CatalogSync<MockSourceApi, MockCatalogApi>,
    }

    fn fixture(source: MockSourceApi, client: MockCatalogApi) -> Fixture {
        let config_dir = tempfile::tempdir().unwrap();
        write_config_folder(config_dir.path());
        let config = BridgeConfig::load(config_dir.path()).unwrap();
        let bridge = Bridge::new(config, client);

        let memory_dir = tempfile::tempdir().unwrap();
        let memory_path = memory_dir.path().join("ledger.json");
        let memory = JsonMemory::open(&memory_path).unwrap();

        Fixture {
            _config_dir: config_dir,
            _memory_dir: memory_dir,
            memory_path,
            sync: CatalogSync::new(source, bridge, Box::new(memory)),
        }
    }

    fn record(id: &str, created: &str, changed: &str) -> SourceRecord {
        SourceRecord::new(json!({
            "_id": id,
            "_source": {
                "aitype": "AI Service",
                "title": format!("asset {}", id),
                "properties": {"created": created, "changed": changed}
            }
        }))
    }

    #[test]
    fn test_run_aborts_when_login_fails() {
        let mut client = MockCatalogApi::new();
        client.expect_is_logged_in().returning(|| false);
        client.expect_login().returning(|_| false);
        let source = MockSourceApi::new();

        let mut fixture = fixture(source, client);
        let result = fixture.sync.run("");
        assert!(matches!(result, Err(AppError::Authentication { .. })));
    }

    #[test]
    fn test_run_aborts_when_platform_check_fails() {
        let mut client = MockCatalogApi::new();
        client.expect_is_logged_in().returning(|| true);
        // Platform GET and registration both fail.
        client
            .expect_get_asset()
            .returning(|_, _| ApiResult::failed(vec!["HTTP 500".to_string()]));
        client
            .expect_add_asset()
            .returning(|_, _| ApiResult::failed(vec!["HTTP 500".to_string()]));
        let source = MockSourceApi::new();

        let mut fixture = fixture(source, client);
        let result = fixture.sync.run("");
        assert!(matches!(result, Err(AppError::Internal { .. })));
    }

    #[test]
    fn test_ingest_created_publishes_and_advances_mark() {
        let now = timestamp("2024-03-10T00:00:00.000000Z");
        let start = timestamp("2024-01-15T00:00:00.000000Z");

        let mut source = MockSourceApi::new();
        source
            .expect_get_created()
            .with(
                eq(timestamp("2024-01-15T00:00:00.000000Z")),
                eq(timestamp("2024-02-01T00:00:00.000000Z")),
            )
            .times(1)
            .returning(|_, _| {
                vec![record(
                    "R1",
                    "2024-01-20T00:00:00.000000Z",
                    "2024-01-20T00:00:00.000000Z",
                )]
            });
        source
            .expect_get_created()
            .with(
                eq(timestamp("2024-02-01T00:00:00.000000Z")),
                eq(timestamp("2024-03-01T00:00:00.000000Z")),
            )
            .times(1)
            .returning(|_, _| Vec::new());
        source
            .expect_get_created()
            .with(
                eq(timestamp("2024-03-01T00:00:00.000000Z")),
                eq(timestamp("2024-04-01T00:00:00.000000Z")),
            )
            .times(1)
            .returning(|_, _| Vec::new());

        let mut client = MockCatalogApi::new();
        client
            .expect_add_asset()
            .with(
                eq("services"),
                eq(json!({"platform_resource_identifier": "R1", "name": "asset R1"})),
            )
            .times(1)
            .returning(|_, _| ApiResult::ok(Some(json!({"identifier": 7})), vec![]));

        let mut fixture = fixture(source, client);
        fixture.sync.memory.set_latest(Stream::Created, start).unwrap();
        fixture.sync.ingest_created_until(now).unwrap();

        // The final window end is clamped to now.
        assert_eq!(fixture.sync.memory.latest(Stream::Created).unwrap(), now);
        assert_eq!(
            fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap(),
            vec!["R1".to_string()]
        );
        assert!(fixture.sync.memory.ids(IdSet::FailedCreated).unwrap().is_empty());
    }

    #[test]
    fn test_ingest_created_records_failures() {
        let now = timestamp("2024-01-20T00:00:00.000000Z");
        let start = timestamp("2024-01-15T00:00:00.000000Z");

        let mut source = MockSourceApi::new();
        source.expect_get_created().returning(|_, _| {
            vec![record(
                "R2",
                "2024-01-16T00:00:00.000000Z",
                "2024-01-16T00:00:00.000000Z",
            )]
        });

        let mut client = MockCatalogApi::new();
        client
            .expect_add_asset()
            .returning(|_, _| ApiResult::failed(vec!["schema rejected".to_string()]));

        let mut fixture = fixture(source, client);
        fixture.sync.memory.set_latest(Stream::Created, start).unwrap();
        fixture.sync.ingest_created_until(now).unwrap();

        assert_eq!(
            fixture.sync.memory.ids(IdSet::FailedCreated).unwrap(),
            vec!["R2".to_string()]
        );
        assert!(fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap().is_empty());
    }

    #[test]
    fn test_ingest_modified_skips_unmodified_records() {
        let now = timestamp("2024-01-20T00:00:00.000000Z");
        let start = timestamp("2024-01-15T00:00:00.000000Z");

        let mut source = MockSourceApi::new();
        source.expect_get_changed().returning(|_, _| {
            vec![
                // created == changed: never actually modified, no upload.
                record(
                    "same",
                    "2024-01-16T00:00:00.000000Z",
                    "2024-01-16T00:00:00.000000Z",
                ),
                record(
                    "edited",
                    "2024-01-16T00:00:00.000000Z",
                    "2024-01-17T00:00:00.000000Z",
                ),
            ]
        });

        let mut client = MockCatalogApi::new();
        // Only the genuinely modified record reaches the destination.
        client
            .expect_add_asset()
            .with(
                eq("services"),
                eq(json!({"platform_resource_identifier": "edited", "name": "asset edited"})),
            )
            .times(1)
            .returning(|_, _| ApiResult::ok(Some(json!({"identifier": 8})), vec![]));

        let mut fixture = fixture(source, client);
        fixture.sync.memory.set_latest(Stream::Modified, start).unwrap();
        fixture.sync.ingest_modified_until(now).unwrap();

        assert_eq!(
            fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap(),
            vec!["edited".to_string()]
        );
        assert_eq!(fixture.sync.memory.latest(Stream::Modified).unwrap(), now);
    }

    #[test]
    fn test_retry_failed_created_leaves_vanished_records_failed() {
        let mut source = MockSourceApi::new();
        source
            .expect_get_by_id()
            .with(eq("gone"))
            .times(1)
            .returning(|_| None);
        source
            .expect_get_by_id()
            .with(eq("back"))
            .times(1)
            .returning(|_| {
                Some(record(
                    "back",
                    "2024-01-16T00:00:00.000000Z",
                    "2024-01-16T00:00:00.000000Z",
                ))
            });

        let mut client = MockCatalogApi::new();
        client
            .expect_add_asset()
            .times(1)
            .returning(|_, _| ApiResult::ok(Some(json!({"identifier": 5})), vec![]));

        let mut fixture = fixture(source, client);
        fixture
            .sync
            .memory
            .update_created(&[], &["back".to_string(), "gone".to_string()])
            .unwrap();

        fixture.sync.retry_failed_created().unwrap();

        assert_eq!(
            fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap(),
            vec!["back".to_string()]
        );
        assert_eq!(
            fixture.sync.memory.ids(IdSet::FailedCreated).unwrap(),
            vec!["gone".to_string()]
        );
    }

    #[test]
    fn test_check_deletion_removes_vanished_records() {
        let mut source = MockSourceApi::new();
        source
            .expect_get_by_id()
            .with(eq("R"))
            .times(1)
            .returning(|_| None);

        let mut client = MockCatalogApi::new();
        client
            .expect_get_asset_from_platform()
            .with(eq("portal"), eq("services"), eq("R"))
            .times(1)
            .returning(|_, _, _| ApiResult::ok(Some(json!({"identifier": 9})), vec![]));
        client
            .expect_delete_asset()
            .with(eq(9), eq("services"))
            .times(1)
            .returning(|_, _| ApiResult::ok(None, vec![]));

        let mut fixture = fixture(source, client);
        fixture
            .sync
            .memory
            .update_created(&["R".to_string()], &[])
            .unwrap();

        fixture.sync.check_deletion().unwrap();

        assert!(fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap().is_empty());
    }

    #[test]
    fn test_check_deletion_keeps_present_records() {
        let mut source = MockSourceApi::new();
        source.expect_get_by_id().with(eq("R")).returning(|_| {
            Some(record(
                "R",
                "2024-01-16T00:00:00.000000Z",
                "2024-01-16T00:00:00.000000Z",
            ))
        });

        let client = MockCatalogApi::new();
        let mut fixture = fixture(source, client);
        fixture
            .sync
            .memory
            .update_created(&["R".to_string()], &[])
            .unwrap();

        fixture.sync.check_deletion().unwrap();

        assert_eq!(
            fixture.sync.memory.ids(IdSet::SuccessCreated).unwrap(),
            vec!["R".to_string()]
        );
    }

    #[test]
    fn test_full_run_saves_ledger() {
        let mut client = MockCatalogApi::new();
        client.expect_is_logged_in().returning(|| true);
        client.expect_get_asset().with(eq("platforms"), eq(3)).returning(|_, _| {
            ApiResult::ok(Some(json!({"identifier": 3, "name": "portal"})), vec![])
        });

        let mut source = MockSourceApi::new();
        source.expect_get_created().returning(|_, _| Vec::new());
        source.expect_get_changed().returning(|_, _| Vec::new());

        let mut fixture = fixture(source, client);
        fixture.sync.run("").unwrap();

        // The run persisted the ledger file.
        assert!(fixture.memory_path.is_file());
    }
}
