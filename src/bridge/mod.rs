//! Translation-and-upload engine
//!
//! The bridge owns the destination client, the translator registry and the
//! platform identity, and exposes the per-record operations the sync driver
//! calls: convert (translate + upload) and delete, plus the login and
//! platform checks that gate a run.

use log::{debug, info, warn};

use crate::aiod::CatalogApi;
use crate::config::BridgeConfig;
use crate::models::{Entity, EntityKey, SourceRecord};
use crate::platform::Platform;

pub mod translator;
pub mod uploader;

pub use translator::{Descriptor, Translator, TranslatorDescriptor, TranslatorRegistry};
pub use uploader::{merge, Uploader};

/// Orchestrates translation and upload of single records.
pub struct Bridge<C: CatalogApi> {
    client: C,
    config: BridgeConfig,
    translator: Translator,
    platform: Platform,
}

impl<C: CatalogApi> Bridge<C> {
    pub fn new(config: BridgeConfig, client: C) -> Self {
        let translator = Translator::new(config.translators_dir());
        for problem in translator.validate() {
            warn!("{}", problem);
        }
        let platform = Platform::from_spec(config.platform());
        Self {
            client,
            config,
            translator,
            platform,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Ensure the session holds a working token, acquiring one if needed.
    /// An empty `access_token` lets the client fetch its own.
    pub fn check_login(&mut self, access_token: &str) -> bool {
        if self.client.is_logged_in() {
            return true;
        }
        debug!("User not logged in to the destination, logging in...");
        if !self.client.login(access_token) {
            warn!("Could not login");
            return false;
        }
        if !self.client.is_logged_in() {
            warn!("Could not login");
            return false;
        }
        debug!("Logged in to the destination");
        true
    }

    /// Ensure the publishing platform exists on the destination.
    pub fn check_platform(&mut self) -> bool {
        self.platform.check(&self.client)
    }

    /// Translate one source record and upload the resulting graph. Returns
    /// whether the root entity was published.
    pub fn convert_asset(&self, record: &SourceRecord, asset_type: &str) -> bool {
        let asset_id = record.id().unwrap_or("<missing _id>");

        let mut graph = self.translator.translate(record.as_value(), asset_type);
        if graph.is_empty() {
            warn!("Failed to translate asset {}", asset_id);
            return false;
        }
        debug!("Successfully translated asset {}", asset_id);

        let root_key = EntityKey::root(asset_type);
        let uploader = Uploader::new(&self.client, self.config.type_to_endpoint());
        if !uploader.upload(&mut graph, &root_key) {
            warn!("Failed to upload asset {}", asset_id);
            return false;
        }

        let identifier = graph
            .get(&root_key)
            .and_then(Entity::identifier)
            .unwrap_or_default();
        info!(
            "Successfully uploaded asset {} with id {}",
            asset_id, identifier
        );
        true
    }

    /// Remove a previously published record from the destination. The
    /// source record is already gone, so its category is recovered from the
    /// destination itself by probing the configured endpoints with the
    /// by-platform lookup.
    pub fn delete_asset(&self, asset_id: &str) -> bool {
        for aiod_type in self.config.endpoint_types() {
            let found =
                self.client
                    .get_asset_from_platform(self.platform.name(), &aiod_type, asset_id);
            if !found.success {
                continue;
            }
            let Some(identifier) = found.identifier() else {
                continue;
            };

            let deleted = self.client.delete_asset(identifier, &aiod_type);
            if !deleted.success {
                warn!(
                    "Could not delete asset {} with identifier {} from the destination",
                    asset_id, identifier
                );
                for reason in deleted.reasons() {
                    debug!("{}", reason);
                }
            }
            return deleted.success;
        }

        warn!(
            "Could not find asset {} by platform \"{}\" on the destination",
            asset_id,
            self.platform.name()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aiod::{ApiResult, MockCatalogApi};
    use crate::config::BridgeConfig;
    use mockall::predicate::eq;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn write_config_folder(dir: &Path) {
        fs::write(
            dir.join("type_to_aiod_endpoint.json"),
            json!({"ai_service": "services", "contact": "contacts"}).to_string(),
        )
        .unwrap();
        fs::write(
            dir.join("platform.json"),
            json!({"name": "portal"}).to_string(),
        )
        .unwrap();
        let translators = dir.join("translators");
        fs::create_dir_all(&translators).unwrap();
        fs::write(
            translators.join("ai_service.json"),
            json!({
                "name": "$/_source/title",
                "platform": "portal",
                "platform_resource_identifier": "$/_id",
                "contact": "$ref/contact"
            })
            .to_string(),
        )
        .unwrap();
        fs::write(
            translators.join("contact.json"),
            json!({"email": "$/_source/email"}).to_string(),
        )
        .unwrap();
    }

    fn bridge_with(client: MockCatalogApi) -> (tempfile::TempDir, Bridge<MockCatalogApi>) {
        let dir = tempfile::tempdir().unwrap();
        write_config_folder(dir.path());
        let config = BridgeConfig::load(dir.path()).unwrap();
        let bridge = Bridge::new(config, client);
        (dir, bridge)
    }

    fn record() -> SourceRecord {
        SourceRecord::new(json!({
            "_id": "R",
            "_source": {
                "aitype": "AI Service",
                "title": "A service",
                "email": "a@example.org"
            }
        }))
    }

    #[test]
    fn test_convert_asset_publishes_graph() {
        let mut client = MockCatalogApi::new();
        client
            .expect_add_asset()
            .with(eq("contacts"), eq(json!({"email": "a@example.org"})))
            .times(1)
            .returning(|_, _| ApiResult::ok(Some(json!({"identifier": 7})), vec![]));
        client
            .expect_add_asset()
            .with(
                eq("services"),
                eq(json!({
                    "name": "A service",
                    "platform": "portal",
                    "platform_resource_identifier": "R",
                    "contact": 7
                })),
            )
            .times(1)
            .returning(|_, _| ApiResult::ok(Some(json!({"identifier": 11})), vec![]));

        let (_dir, bridge) = bridge_with(client);
        assert!(bridge.convert_asset(&record(), "ai_service"));
    }

    #[test]
    fn test_convert_asset_fails_without_translator() {
        let client = MockCatalogApi::new();
        let (_dir, bridge) = bridge_with(client);
        assert!(!bridge.convert_asset(&record(), "unknown_type"));
    }

    #[test]
    fn test_convert_asset_fails_when_upload_fails() {
        let mut client = MockCatalogApi::new();
        client
            .expect_add_asset()
            .returning(|_, _| ApiResult::failed(vec!["schema rejected".to_string()]));

        let (_dir, bridge) = bridge_with(client);
        assert!(!bridge.convert_asset(&record(), "ai_service"));
    }

    #[test]
    fn test_delete_asset_probes_endpoints() {
        let mut client = MockCatalogApi::new();
        // Endpoint probing runs in sorted order: contacts misses, services hits.
        client
            .expect_get_asset_from_platform()
            .with(eq("portal"), eq("contacts"), eq("R"))
            .times(1)
            .returning(|_, _, _| ApiResult::failed(vec!["HTTP 404".to_string()]));
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

        let (_dir, bridge) = bridge_with(client);
        assert!(bridge.delete_asset("R"));
    }

    #[test]
    fn test_delete_asset_fails_when_not_found_anywhere() {
        let mut client = MockCatalogApi::new();
        client
            .expect_get_asset_from_platform()
            .times(2)
            .returning(|_, _, _| ApiResult::failed(vec!["HTTP 404".to_string()]));

        let (_dir, bridge) = bridge_with(client);
        assert!(!bridge.delete_asset("R"));
    }

    #[test]
    fn test_check_login_short_circuits_when_logged_in() {
        let mut client = MockCatalogApi::new();
        client.expect_is_logged_in().times(1).returning(|| true);

        let (_dir, mut bridge) = bridge_with(client);
        assert!(bridge.check_login(""));
    }

    #[test]
    fn test_check_login_acquires_token() {
        let mut client = MockCatalogApi::new();
        let mut logged_in = false;
        client.expect_is_logged_in().returning(move || {
            let was = logged_in;
            logged_in = true;
            was
        });
        client
            .expect_login()
            .with(eq(""))
            .times(1)
            .returning(|_| true);

        let (_dir, mut bridge) = bridge_with(client);
        assert!(bridge.check_login(""));
    }

    #[test]
    fn test_check_login_fails_when_login_fails() {
        let mut client = MockCatalogApi::new();
        client.expect_is_logged_in().returning(|| false);
        client.expect_login().times(1).returning(|_| false);

        let (_dir, mut bridge) = bridge_with(client);
        assert!(!bridge.check_login(""));
    }
}
