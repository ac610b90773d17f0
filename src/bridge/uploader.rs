//! Dependency-ordered graph upload
//!
//! The uploader publishes a translation graph leaves first: every entity
//! waits until each sub-entity it references has a destination identifier,
//! stitches those identifiers into its own body, and only then is POSTed.
//! A POST rejected because the asset already exists on the destination is
//! healed locally by fetching the existing asset, merging the new body over
//! it, and PUTting the result.

use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::aiod::CatalogApi;
use crate::models::{Entity, EntityKey, Graph};

const CONFLICT_PREFIX: &str = "There already exists";
const IDENTIFIER_MARKER: &str = "identifier=";

/// Walk bookkeeping: which keys have been visited, and which locations
/// inside an entity could not be resolved to an identifier.
#[derive(Debug, Default)]
struct UploadState {
    visited: HashSet<EntityKey>,
    failed: HashMap<EntityKey, BTreeSet<String>>,
}

/// Uploads one translation graph against the destination catalog.
pub struct Uploader<'a, C: CatalogApi> {
    client: &'a C,
    type_to_endpoint: &'a HashMap<String, String>,
}

impl<'a, C: CatalogApi> Uploader<'a, C> {
    pub fn new(client: &'a C, type_to_endpoint: &'a HashMap<String, String>) -> Self {
        Self {
            client,
            type_to_endpoint,
        }
    }

    /// Upload the graph starting from its root. Returns whether the root
    /// entity ended up with a destination identifier.
    pub fn upload(&self, graph: &mut Graph, root: &EntityKey) -> bool {
        let mut state = UploadState::default();
        self.visit(graph, root, &mut state);

        for (key, locations) in &state.failed {
            warn!(
                "Entity {} was not uploaded; unresolved references at {:?}",
                key, locations
            );
        }

        graph.get(root).and_then(Entity::identifier).is_some()
    }

    fn visit(&self, graph: &mut Graph, key: &EntityKey, state: &mut UploadState) {
        if state.visited.contains(key) {
            return;
        }
        state.visited.insert(key.clone());

        let references: Vec<(String, EntityKey)> = match graph.get(key) {
            Some(entity) => entity
                .references
                .iter()
                .map(|(location, sub_key)| (location.clone(), sub_key.clone()))
                .collect(),
            None => return,
        };

        let mut failed = BTreeSet::new();
        for (location, sub_key) in references {
            if !state.visited.contains(&sub_key) {
                self.visit(graph, &sub_key, state);
            }

            let sub_identifier = graph.get(&sub_key).and_then(Entity::identifier);
            let resolved = match sub_identifier {
                Some(identifier) => {
                    let Some(entity) = graph.get_mut(key) else {
                        return;
                    };
                    stitch(entity, &location, identifier)
                }
                None => false,
            };

            if resolved {
                if let Some(entity) = graph.get_mut(key) {
                    entity.references.shift_remove(&location);
                }
            } else {
                failed.insert(location);
                break;
            }
        }

        if failed.is_empty() {
            if let Some(entity) = graph.get_mut(key) {
                self.post_and_put(key, entity);
            }
        } else {
            state.failed.insert(key.clone(), failed);
        }
    }

    /// POST the entity; on an already-exists rejection, fetch the existing
    /// asset, merge the new body over it and PUT the result.
    fn post_and_put(&self, key: &EntityKey, entity: &mut Entity) {
        let Some(aiod_type) = self.type_to_endpoint.get(key.type_name()) else {
            warn!(
                "Could not match the type {} with a destination endpoint",
                key.type_name()
            );
            return;
        };

        let body = entity.body();
        let result = self.client.add_asset(aiod_type, &body);
        if result.success {
            match result.identifier() {
                Some(identifier) => entity.set_identifier(identifier),
                None => warn!(
                    "Created {} but the destination returned no identifier",
                    describe(key, entity)
                ),
            }
            return;
        }

        info!("Could not upload asset {}", describe(key, entity));
        let reasons = result.reason.unwrap_or_default();
        let Some(existing) = existing_identifier(&reasons) else {
            for reason in &reasons {
                info!("Asset {}: {}", describe(key, entity), reason);
            }
            return;
        };

        info!(
            "Asset {} already uploaded with identifier {}, trying to solve conflict...",
            describe(key, entity),
            existing
        );
        let fetched = self.client.get_asset(aiod_type, existing);
        if !fetched.success {
            warn!(
                "Could not retrieve asset {} with identifier {}",
                describe(key, entity),
                existing
            );
            return;
        }
        let Some(old) = fetched.value else {
            return;
        };

        let merged = merge(&body, &old);
        let updated = self.client.update_asset(aiod_type, &merged);
        if updated.success {
            entity.set_identifier(existing);
        } else {
            warn!(
                "Could not PUT asset {} with identifier {}",
                describe(key, entity),
                existing
            );
        }
    }
}

fn describe(key: &EntityKey, entity: &Entity) -> String {
    entity
        .platform_resource_identifier()
        .map(str::to_string)
        .unwrap_or_else(|| key.to_string())
}

/// Write an identifier at a slash-separated location inside the entity.
/// Intermediate steps must exist; the terminal step assigns into objects and
/// assigns or appends into arrays (an index one past the end appends, which
/// keeps list references correct as long as they resolve in order).
fn stitch(entity: &mut Entity, location: &str, identifier: i64) -> bool {
    let steps: Vec<&str> = location.split('/').collect();
    let (first, rest) = match steps.split_first() {
        Some(parts) => parts,
        None => return false,
    };

    if rest.is_empty() {
        entity
            .fields
            .insert(first.to_string(), Value::from(identifier));
        return true;
    }

    let mut current = match entity.fields.get_mut(*first) {
        Some(value) => value,
        None => return false,
    };
    for step in &rest[..rest.len() - 1] {
        current = match current {
            Value::Object(map) => match map.get_mut(*step) {
                Some(value) => value,
                None => return false,
            },
            Value::Array(items) => {
                let Some(position) = step.parse::<usize>().ok() else {
                    return false;
                };
                match items.get_mut(position) {
                    Some(value) => value,
                    None => return false,
                }
            }
            _ => return false,
        };
    }

    let last = rest[rest.len() - 1];
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), Value::from(identifier));
            true
        }
        Value::Array(items) => match last.parse::<usize>() {
            Ok(position) if position < items.len() => {
                items[position] = Value::from(identifier);
                true
            }
            Ok(_) => {
                items.push(Value::from(identifier));
                true
            }
            Err(_) => false,
        },
        _ => false,
    }
}

/// Extract the identifier embedded in an already-exists rejection.
fn existing_identifier(reasons: &[String]) -> Option<i64> {
    let conflict = reasons
        .iter()
        .find(|reason| reason.starts_with(CONFLICT_PREFIX))?;
    let position = conflict.find(IDENTIFIER_MARKER)?;
    let digits: String = conflict[position + IDENTIFIER_MARKER.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Merge `new` over `old`: keys only in `old` are adopted, object values
/// merge recursively, list values extend (`new` items first), and any other
/// clash keeps `new`. Not commutative.
pub fn merge(new: &Value, old: &Value) -> Value {
    let mut result = new.clone();
    merge_into(&mut result, old);
    result
}

fn merge_into(result: &mut Value, old: &Value) {
    let (Value::Object(result_map), Value::Object(old_map)) = (result, old) else {
        return;
    };
    for (key, old_value) in old_map {
        match result_map.get_mut(key) {
            None => {
                result_map.insert(key.clone(), old_value.clone());
            }
            Some(new_value) => {
                if new_value.is_object() && old_value.is_object() {
                    merge_into(new_value, old_value);
                } else if let (Value::Array(new_items), Value::Array(old_items)) =
                    (new_value, old_value)
                {
                    new_items.extend(old_items.iter().cloned());
                }
                // Any other clash keeps the new value.
            }
        }
    }
}
