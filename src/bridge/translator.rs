//! Declarative record translation
//!
//! A translator descriptor mirrors the shape of the destination entity it
//! produces. Descriptors are parsed once, when their file is first loaded,
//! into a tagged [`Descriptor`] tree; translating a record is then a single
//! recursive walk that builds the destination entity field by field and
//! registers referenced sub-entities in the translation graph.

use log::warn;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::{Entity, EntityKey, Graph};

// =============================================================================
// Descriptor model
// =============================================================================

/// One parsed descriptor leaf or node.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// Integer literal copied into the entity.
    Int(i64),
    /// String literal copied into the entity.
    Literal(String),
    /// Slash-separated path into the source record, with an optional literal
    /// suffix concatenated onto string results.
    Path {
        tokens: Vec<String>,
        suffix: Option<String>,
    },
    /// Reference to a sub-entity translated with the named descriptor.
    Ref { type_name: String },
    /// One referenced sub-entity per element of the list at `tokens`.
    ListRef {
        type_name: String,
        tokens: Vec<String>,
    },
    /// Nested entity.
    Map(Vec<(String, Descriptor)>),
    /// Ordered elements whose list-valued translations are flattened into
    /// one combined list.
    List(Vec<Descriptor>),
}

impl Descriptor {
    /// Parse one descriptor value. Returns `None` for leaves the grammar
    /// does not know; the surrounding field is dropped from the output.
    pub fn parse(value: &Value) -> Option<Descriptor> {
        match value {
            Value::Number(number) => match number.as_i64() {
                Some(int) => Some(Descriptor::Int(int)),
                None => {
                    warn!("Dropping non-integer numeric descriptor leaf {}", number);
                    None
                }
            },
            Value::String(expression) => Self::parse_expression(expression),
            Value::Object(map) => Some(Descriptor::Map(parse_object(map))),
            Value::Array(items) => Some(Descriptor::List(
                items.iter().filter_map(Self::parse).collect(),
            )),
            _ => {
                warn!("Dropping unsupported descriptor leaf {}", value);
                None
            }
        }
    }

    fn parse_expression(expression: &str) -> Option<Descriptor> {
        if !expression.starts_with('$') {
            return Some(Descriptor::Literal(expression.to_string()));
        }

        if let Some(body) = expression.strip_prefix("$/") {
            let (path, suffix) = match body.split_once('$') {
                Some((path, suffix)) => (path, Some(suffix.to_string())),
                None => (body, None),
            };
            return Some(Descriptor::Path {
                tokens: path.split('/').map(str::to_string).collect(),
                suffix,
            });
        }

        if let Some(body) = expression.strip_prefix("$listref/") {
            let mut parts = body.split('/');
            let type_name = parts.next().unwrap_or_default().to_string();
            if type_name.is_empty() {
                warn!("Dropping $listref with no type: {}", expression);
                return None;
            }
            return Some(Descriptor::ListRef {
                type_name,
                tokens: parts.map(str::to_string).collect(),
            });
        }

        if let Some(body) = expression.strip_prefix("$ref/") {
            let type_name = body.split('/').next().unwrap_or_default().to_string();
            if type_name.is_empty() {
                warn!("Dropping $ref with no type: {}", expression);
                return None;
            }
            return Some(Descriptor::Ref { type_name });
        }

        warn!("Dropping unrecognized descriptor expression {}", expression);
        None
    }

    /// Translator types this descriptor refers to, for registry validation.
    fn collect_referenced_types(&self, into: &mut Vec<String>) {
        match self {
            Descriptor::Ref { type_name } | Descriptor::ListRef { type_name, .. } => {
                into.push(type_name.clone());
            }
            Descriptor::Map(fields) => {
                for (_, descriptor) in fields {
                    descriptor.collect_referenced_types(into);
                }
            }
            Descriptor::List(elements) => {
                for descriptor in elements {
                    descriptor.collect_referenced_types(into);
                }
            }
            _ => {}
        }
    }
}

fn parse_object(map: &Map<String, Value>) -> Vec<(String, Descriptor)> {
    map.iter()
        .filter_map(|(key, value)| Descriptor::parse(value).map(|d| (key.clone(), d)))
        .collect()
}

/// A whole descriptor file: the ordered fields of one destination entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatorDescriptor {
    fields: Vec<(String, Descriptor)>,
}

impl TranslatorDescriptor {
    pub fn from_object(map: &Map<String, Value>) -> Self {
        Self {
            fields: parse_object(map),
        }
    }

    pub fn fields(&self) -> &[(String, Descriptor)] {
        &self.fields
    }

    pub fn referenced_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for (_, descriptor) in &self.fields {
            descriptor.collect_referenced_types(&mut types);
        }
        types
    }
}

// =============================================================================
// Registry
// =============================================================================

/// On-demand loader and cache for `translators/<type>.json` descriptor
/// files. Negative lookups are cached too, so a missing file is warned about
/// once per run.
#[derive(Debug)]
pub struct TranslatorRegistry {
    dir: PathBuf,
    cache: RefCell<HashMap<String, Option<Arc<TranslatorDescriptor>>>>,
}

impl TranslatorRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<TranslatorDescriptor>> {
        if let Some(cached) = self.cache.borrow().get(type_name) {
            return cached.clone();
        }
        let loaded = self.load(type_name);
        self.cache
            .borrow_mut()
            .insert(type_name.to_string(), loaded.clone());
        loaded
    }

    fn load(&self, type_name: &str) -> Option<Arc<TranslatorDescriptor>> {
        let path = self.dir.join(format!("{}.json", type_name));
        if !path.is_file() {
            warn!("Translation file {:?} not found", path);
            return None;
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Could not read translation file {:?}: {}", path, err);
                return None;
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Some(Arc::new(TranslatorDescriptor::from_object(&map))),
            Ok(_) => {
                warn!("Translation file {:?} is not a JSON object", path);
                None
            }
            Err(err) => {
                warn!("Translation file {:?} is not valid JSON: {}", path, err);
                None
            }
        }
    }

    /// Check that every `$ref`/`$listref` target across the descriptor
    /// directory has a descriptor file of its own. Returns one error per
    /// dangling reference.
    pub fn validate(&self) -> Vec<AppError> {
        let mut problems = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                return vec![AppError::FileSystem {
                    path: self.dir.display().to_string(),
                    reason: err.to_string(),
                }]
            }
        };
        let mut types: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        types.sort();

        for type_name in types {
            let Some(descriptor) = self.get(&type_name) else {
                continue;
            };
            for referenced in descriptor.referenced_types() {
                if self.get(&referenced).is_none() {
                    problems.push(AppError::translator(
                        type_name.clone(),
                        format!("references unknown type \"{}\"", referenced),
                    ));
                }
            }
        }
        problems
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Builds translation graphs from source records using the descriptors in a
/// registry.
#[derive(Debug)]
pub struct Translator {
    registry: TranslatorRegistry,
}

impl Translator {
    pub fn new(translators_dir: PathBuf) -> Self {
        Self {
            registry: TranslatorRegistry::new(translators_dir),
        }
    }

    /// Report dangling descriptor references.
    pub fn validate(&self) -> Vec<AppError> {
        self.registry.validate()
    }

    /// Translate one source record into a graph of destination entities.
    /// The root entity is stored under `/<type>`; an unknown type yields an
    /// empty graph.
    pub fn translate(&self, record: &Value, type_name: &str) -> Graph {
        let mut graph = Graph::new();
        let Some(descriptor) = self.registry.get(type_name) else {
            return graph;
        };
        let root = self.translate_fields(record, &mut graph, descriptor.fields(), None);
        graph.insert(EntityKey::root(type_name), root);
        graph
    }

    fn translate_fields(
        &self,
        record: &Value,
        graph: &mut Graph,
        fields: &[(String, Descriptor)],
        index: Option<usize>,
    ) -> Entity {
        let mut entity = Entity::new();
        for (key, descriptor) in fields {
            self.translate_field(record, graph, &mut entity, key, descriptor, index);
        }
        entity
    }

    fn translate_field(
        &self,
        record: &Value,
        graph: &mut Graph,
        entity: &mut Entity,
        key: &str,
        descriptor: &Descriptor,
        index: Option<usize>,
    ) {
        match descriptor {
            Descriptor::Int(value) => {
                entity.fields.insert(key.to_string(), Value::from(*value));
            }

            Descriptor::Literal(value) => {
                entity
                    .fields
                    .insert(key.to_string(), Value::from(value.clone()));
            }

            Descriptor::Path { tokens, suffix } => {
                // A path that misses leaves the field absent.
                if let Some(resolved) = resolve_path(record, tokens, index) {
                    let value = match (resolved, suffix) {
                        (Value::String(text), Some(suffix)) => {
                            Value::from(format!("{}{}", text, suffix))
                        }
                        (other, _) => other.clone(),
                    };
                    entity.fields.insert(key.to_string(), value);
                }
            }

            Descriptor::Ref { type_name } => {
                let sub_key = EntityKey::reference(type_name.clone(), index);
                self.ensure_sub_entity(record, graph, &sub_key, type_name, index);
                entity.references.insert(key.to_string(), sub_key);
            }

            Descriptor::ListRef { type_name, tokens } => {
                // The field starts as an empty list; identifiers are
                // appended during stitching, in element order.
                entity
                    .fields
                    .insert(key.to_string(), Value::Array(Vec::new()));
                let Some(Value::Array(items)) = resolve_path(record, tokens, None) else {
                    return;
                };
                for element_index in 0..items.len() {
                    let sub_key = EntityKey::reference(type_name.clone(), Some(element_index));
                    self.ensure_sub_entity(record, graph, &sub_key, type_name, Some(element_index));
                    entity
                        .references
                        .insert(format!("{}/{}", key, element_index), sub_key);
                }
            }

            Descriptor::Map(fields) => {
                let sub = self.translate_fields(record, graph, fields, None);
                for (location, sub_key) in sub.references {
                    entity
                        .references
                        .insert(format!("{}/{}", key, location), sub_key);
                }
                entity
                    .fields
                    .insert(key.to_string(), Value::Object(sub.fields));
            }

            Descriptor::List(elements) => {
                // Elements translate like a map keyed by position; only
                // list-valued results survive, flattened into one list.
                let mut combined = Vec::new();
                let mut scratch = Entity::new();
                for (element_index, element) in elements.iter().enumerate() {
                    let slot = element_index.to_string();
                    self.translate_field(record, graph, &mut scratch, &slot, element, None);
                    if let Some(Value::Array(items)) = scratch.fields.remove(&slot) {
                        combined.extend(items);
                    }
                }
                for (location, sub_key) in scratch.references {
                    entity
                        .references
                        .insert(format!("{}/{}", key, location), sub_key);
                }
                entity
                    .fields
                    .insert(key.to_string(), Value::Array(combined));
            }
        }
    }

    /// Translate the referenced sub-entity unless the graph already holds
    /// (or is in the middle of building) it. The placeholder inserted before
    /// recursion is what keeps self-referencing descriptors from looping.
    fn ensure_sub_entity(
        &self,
        record: &Value,
        graph: &mut Graph,
        sub_key: &EntityKey,
        type_name: &str,
        index: Option<usize>,
    ) {
        if graph.contains(sub_key) {
            return;
        }
        graph.insert(sub_key.clone(), Entity::new());
        let sub = match self.registry.get(type_name) {
            Some(descriptor) => self.translate_fields(record, graph, descriptor.fields(), index),
            None => Entity::new(),
        };
        graph.insert(sub_key.clone(), sub);
    }
}

/// Walk a slash-separated path into the record. Object steps look tokens up
/// as keys; array steps accept digit tokens or, for the token `i`, the
/// inherited element index.
fn resolve_path<'a>(record: &'a Value, tokens: &[String], index: Option<usize>) -> Option<&'a Value> {
    let mut current = record;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => {
                let position = if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
                    token.parse::<usize>().ok()?
                } else if token == "i" {
                    index?
                } else {
                    return None;
                };
                items.get(position)?
            }
            _ => return None,
        };
    }
    Some(current)
}
