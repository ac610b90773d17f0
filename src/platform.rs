//! Platform registrar
//!
//! The bridge publishes every asset under one platform identity. Before a
//! run starts, the registrar makes sure that identity exists on the
//! destination: a known identifier is verified by name and corrected with an
//! update, anything else is registered fresh. Matching is by name only; the
//! name is what later deletion lookups key on.

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::aiod::CatalogApi;
use crate::config::PlatformSpec;

const PLATFORMS_ENDPOINT: &str = "platforms";

/// The publisher's platform identity on the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    name: String,
    identifier: Option<i64>,
}

impl Platform {
    pub fn from_spec(spec: &PlatformSpec) -> Self {
        Self {
            name: spec.name.clone(),
            identifier: spec.identifier,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> Option<i64> {
        self.identifier
    }

    /// The identity as a destination body; an absent or zero identifier is
    /// omitted so creation lets the destination assign one.
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        body.insert("name".to_string(), Value::from(self.name.clone()));
        if let Some(identifier) = self.identifier.filter(|&id| id != 0) {
            body.insert("identifier".to_string(), Value::from(identifier));
        }
        Value::Object(body)
    }

    /// Ensure the platform exists on the destination, registering or
    /// correcting it as needed. Returns whether the identity is usable.
    pub fn check<C: CatalogApi>(&mut self, client: &C) -> bool {
        debug!("Checking the platform on the destination catalog");
        if let Some(identifier) = self.identifier.filter(|&id| id != 0) {
            let result = client.get_asset(PLATFORMS_ENDPOINT, identifier);
            if let (true, Some(platform)) = (result.success, result.value.as_ref()) {
                if platform.get("name").and_then(Value::as_str) == Some(self.name.as_str()) {
                    return true;
                }
                let updated = client.update_asset(PLATFORMS_ENDPOINT, &self.to_value());
                return updated.success;
            }
            // The recorded identifier cannot be read back; register anew.
        }

        info!("Registering platform with name {}", self.name);
        let added = client.add_asset(PLATFORMS_ENDPOINT, &self.to_value());
        if !added.success {
            warn!("Failed to add platform {}", self.name);
            for reason in added.reasons() {
                debug!("{}", reason);
            }
            return false;
        }
        match added.identifier() {
            Some(identifier) => {
                self.identifier = Some(identifier);
                debug!(
                    "Added platform {} with identifier {}",
                    self.name, identifier
                );
                true
            }
            None => {
                warn!(
                    "Platform {} was created but no identifier was returned",
                    self.name
                );
                false
            }
        }
    }
}
