//! Bridge configuration folder
//!
//! The configuration folder carries everything that describes the publisher:
//! `type_to_aiod_endpoint.json` mapping normalized source categories to
//! destination endpoint path segments, `platform.json` with the publisher
//! identity, and a `translators/` directory of per-type descriptor files
//! (loaded on demand by the translator registry).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};

const TYPE_MAP_FILE: &str = "type_to_aiod_endpoint.json";
const PLATFORM_FILE: &str = "platform.json";
const TRANSLATORS_DIR: &str = "translators";

/// Publisher identity as stored in `platform.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<i64>,
}

/// Contents of one configuration folder.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    folder: PathBuf,
    type_to_endpoint: HashMap<String, String>,
    platform: PlatformSpec,
}

impl BridgeConfig {
    pub fn load(folder: impl AsRef<Path>) -> AppResult<Self> {
        let folder = folder.as_ref().to_path_buf();
        if !folder.is_dir() {
            return Err(AppError::ConfigurationNotFound {
                path: folder.display().to_string(),
            });
        }

        let type_to_endpoint: HashMap<String, String> =
            read_json(&folder.join(TYPE_MAP_FILE))?;
        let platform: PlatformSpec = read_json(&folder.join(PLATFORM_FILE))?;

        if platform.name.trim().is_empty() {
            return Err(AppError::configuration(
                PLATFORM_FILE,
                "platform must have a name",
            ));
        }
        if matches!(platform.identifier, Some(identifier) if identifier < 0) {
            return Err(AppError::configuration(
                PLATFORM_FILE,
                "the identifier has to be a positive integer",
            ));
        }

        Ok(Self {
            folder,
            type_to_endpoint,
            platform,
        })
    }

    /// The destination endpoint segment for a normalized source category.
    pub fn endpoint_for_type(&self, asset_type: &str) -> Option<&str> {
        self.type_to_endpoint.get(asset_type).map(String::as_str)
    }

    pub fn type_to_endpoint(&self) -> &HashMap<String, String> {
        &self.type_to_endpoint
    }

    /// All configured destination endpoint segments, deduplicated and
    /// sorted. Used by the deletion check to probe for a vanished record
    /// whose category can no longer be read from the source.
    pub fn endpoint_types(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.type_to_endpoint.values().cloned().collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    pub fn platform(&self) -> &PlatformSpec {
        &self.platform
    }

    pub fn translators_dir(&self) -> PathBuf {
        self.folder.join(TRANSLATORS_DIR)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<T> {
    let content = fs::read_to_string(path).map_err(|_| AppError::ConfigurationNotFound {
        path: path.display().to_string(),
    })?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::configuration(path.display().to_string(), err.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    pub(crate) fn write_config(
        dir: &Path,
        type_map: &serde_json::Value,
        platform: &serde_json::Value,
    ) {
        fs::write(dir.join(TYPE_MAP_FILE), type_map.to_string()).unwrap();
        fs::write(dir.join(PLATFORM_FILE), platform.to_string()).unwrap();
        fs::create_dir_all(dir.join(TRANSLATORS_DIR)).unwrap();
    }

    #[test]
    fn test_load_reads_type_map_and_platform() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            &serde_json::json!({"ai_service": "services", "dataset": "datasets"}),
            &serde_json::json!({"name": "portal", "identifier": 3}),
        );

        let config = BridgeConfig::load(dir.path()).unwrap();
        assert_eq!(config.endpoint_for_type("ai_service"), Some("services"));
        assert_eq!(config.endpoint_for_type("unknown"), None);
        assert_eq!(
            config.platform(),
            &PlatformSpec {
                name: "portal".to_string(),
                identifier: Some(3)
            }
        );
        assert_eq!(config.endpoint_types(), vec!["datasets", "services"]);
    }

    #[test]
    fn test_endpoint_types_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            &serde_json::json!({"a": "services", "b": "services"}),
            &serde_json::json!({"name": "portal"}),
        );

        let config = BridgeConfig::load(dir.path()).unwrap();
        assert_eq!(config.endpoint_types(), vec!["services"]);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load(dir.path().join("nope"));
        assert_matches!(result, Err(AppError::ConfigurationNotFound { .. }));
    }

    #[test]
    fn test_platform_without_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            &serde_json::json!({}),
            &serde_json::json!({"name": ""}),
        );
        let result = BridgeConfig::load(dir.path());
        assert_matches!(result, Err(AppError::Configuration { .. }));
    }
}
