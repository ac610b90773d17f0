//! Data models for the AIoD bridge
//!
//! This module contains the data structures shared across the bridge: the
//! opaque source record, the destination entity under construction, the
//! structured entity key, and the translation graph produced by the
//! translator and consumed by the uploader.

use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::AppResult;

/// Wire timestamp format shared by the source API, the ledger, and record
/// properties (UTC, microsecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Parse format accepting any fractional-second precision, including none.
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Parse a wire timestamp into a UTC datetime.
pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_PARSE_FORMAT)?;
    Ok(naive.and_utc())
}

/// Format a UTC datetime as a wire timestamp.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Normalize a source `aitype` into the key used by the endpoint map:
/// lowercased, spaces replaced with underscores.
pub fn normalize_aitype(aitype: &str) -> String {
    aitype.to_lowercase().replace(' ', "_")
}

// =============================================================================
// Source record
// =============================================================================

/// One record returned by the source search API.
///
/// The document is opaque apart from its `_id` and a handful of `_source`
/// properties; the translator traverses the rest generically by path.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    raw: Value,
}

impl SourceRecord {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// The full document, for path traversal.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    pub fn id(&self) -> Option<&str> {
        self.raw.get("_id").and_then(Value::as_str)
    }

    pub fn aitype(&self) -> Option<&str> {
        self.raw
            .pointer("/_source/aitype")
            .and_then(Value::as_str)
    }

    /// The source category normalized into an endpoint-map key.
    pub fn asset_type(&self) -> Option<String> {
        self.aitype().map(normalize_aitype)
    }

    pub fn created(&self) -> Option<&str> {
        self.raw
            .pointer("/_source/properties/created")
            .and_then(Value::as_str)
    }

    pub fn changed(&self) -> Option<&str> {
        self.raw
            .pointer("/_source/properties/changed")
            .and_then(Value::as_str)
    }

    /// A record whose changed timestamp equals its created timestamp has
    /// never actually been modified.
    pub fn is_unmodified(&self) -> bool {
        match (self.created(), self.changed()) {
            (Some(created), Some(changed)) => created == changed,
            _ => false,
        }
    }
}

// =============================================================================
// Entity keys
// =============================================================================

/// Identity of one node in a translation graph.
///
/// The root of a graph is keyed by its translator type; sub-entities are
/// keyed by the referenced type plus the positional index when they were
/// produced from a list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Root { type_name: String },
    Ref {
        type_name: String,
        index: Option<usize>,
    },
}

impl EntityKey {
    pub fn root(type_name: impl Into<String>) -> Self {
        Self::Root {
            type_name: type_name.into(),
        }
    }

    pub fn reference(type_name: impl Into<String>, index: Option<usize>) -> Self {
        Self::Ref {
            type_name: type_name.into(),
            index,
        }
    }

    /// The translator type this key names, used to select the destination
    /// endpoint.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Root { type_name } => type_name,
            Self::Ref { type_name, .. } => type_name,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root { type_name } => write!(f, "/{}", type_name),
            Self::Ref {
                type_name,
                index: None,
            } => write!(f, "$ref/{}", type_name),
            Self::Ref {
                type_name,
                index: Some(i),
            } => write!(f, "$ref/{}/{}", type_name, i),
        }
    }
}

// =============================================================================
// Entities and the translation graph
// =============================================================================

/// A destination entity under construction.
///
/// `fields` is the JSON body that will be uploaded. `references` records,
/// per slash-separated location inside the body, the key of the sub-entity
/// whose identifier must be written there once known; insertion order is
/// preserved because list locations are stitched by appending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pub fields: Map<String, Value>,
    pub references: IndexMap<String, EntityKey>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    /// An entity with no fields and no references translates to nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.references.is_empty()
    }

    pub fn identifier(&self) -> Option<i64> {
        self.fields.get("identifier").and_then(Value::as_i64)
    }

    pub fn set_identifier(&mut self, identifier: i64) {
        self.fields
            .insert("identifier".to_string(), Value::from(identifier));
    }

    /// The source-side identifier carried on published entities, for logs.
    pub fn platform_resource_identifier(&self) -> Option<&str> {
        self.fields
            .get("platform_resource_identifier")
            .and_then(Value::as_str)
    }

    /// The JSON body to upload. References are tracked outside the body, so
    /// the destination never sees bookkeeping fields.
    pub fn body(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// The output of translating one source record: destination entities keyed
/// by entity key, in creation order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    entities: IndexMap<EntityKey, Entity>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    pub fn insert(&mut self, key: EntityKey, entity: Entity) {
        self.entities.insert(key, entity);
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        self.entities.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Entity)> {
        self.entities.iter()
    }
}
