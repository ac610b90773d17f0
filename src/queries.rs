//! Query builder for the source search API
//!
//! Holds the three query template documents (`created`, `changed`, `by_id`)
//! serialized once at construction. Building a query is plain sentinel
//! substitution on the serialized string; no JSON re-parsing happens per
//! call.

use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};

const GT_TIMESTAMP: &str = "GT_TIMESTAMP";
const LTE_TIMESTAMP: &str = "LTE_TIMESTAMP";
const ASSET_ID: &str = "ASSET_ID";

/// Serialized search-API query templates with sentinel substitution.
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    created: String,
    modified: String,
    by_id: String,
}

impl QueryTemplates {
    /// Templates matching the portal's search index layout.
    pub fn new() -> Self {
        // with_templates only fails on a document missing one of the three
        // keys, which the defaults always carry.
        Self::with_templates(default_templates())
            .expect("default query templates are complete")
    }

    /// Build from a custom template document. The document must hold the
    /// `created`, `changed` and `by_id` keys; `changed` is what the
    /// `modified` builder emits.
    pub fn with_templates(templates: Value) -> AppResult<Self> {
        let serialize = |key: &str| -> AppResult<String> {
            let template = templates.get(key).ok_or_else(|| {
                AppError::configuration("queries", format!("missing template \"{}\"", key))
            })?;
            Ok(serde_json::to_string(template)?)
        };

        Ok(Self {
            created: serialize("created")?,
            modified: serialize("changed")?,
            by_id: serialize("by_id")?,
        })
    }

    /// Query for records created in the window `(gt, lte]`.
    pub fn created(&self, gt_timestamp: &str, lte_timestamp: &str) -> String {
        self.created
            .replace(GT_TIMESTAMP, gt_timestamp)
            .replace(LTE_TIMESTAMP, lte_timestamp)
    }

    /// Query for records modified in the window `(gt, lte]`.
    pub fn modified(&self, gt_timestamp: &str, lte_timestamp: &str) -> String {
        self.modified
            .replace(GT_TIMESTAMP, gt_timestamp)
            .replace(LTE_TIMESTAMP, lte_timestamp)
    }

    /// Query for a single record by its source id.
    pub fn by_id(&self, asset_id: &str) -> String {
        self.by_id.replace(ASSET_ID, asset_id)
    }
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self::new()
    }
}

fn default_templates() -> Value {
    json!({
        "created": {
            "query": {
                "query": {
                    "bool": {
                        "filter": [
                            { "term": { "_index": "aiasset" } },
                            {
                                "range": {
                                    "properties.created": {
                                        "gt": GT_TIMESTAMP,
                                        "lte": LTE_TIMESTAMP
                                    }
                                }
                            }
                        ]
                    }
                }
            }
        },
        "changed": {
            "query": {
                "query": {
                    "bool": {
                        "filter": [
                            { "term": { "_index": "aiasset" } },
                            {
                                "range": {
                                    "properties.changed": {
                                        "gt": GT_TIMESTAMP,
                                        "lte": LTE_TIMESTAMP
                                    }
                                }
                            }
                        ]
                    }
                }
            }
        },
        "by_id": {
            "query": {
                "query": {
                    "bool": {
                        "filter": [
                            { "term": { "_id": ASSET_ID } }
                        ]
                    }
                }
            }
        }
    })
}
