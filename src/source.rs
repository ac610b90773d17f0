//! Source search-API client
//!
//! One POST endpoint accepting the query bodies built by
//! [`QueryTemplates`](crate::queries::QueryTemplates). Any transport
//! problem, non-2xx status, unsuccessful response flag or missing data
//! array means "no records"; the driver treats absence and failure alike
//! and retries through the ledger.

use chrono::{DateTime, Utc};
use log::warn;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;

use crate::errors::AppResult;
use crate::models::{format_timestamp, SourceRecord};
use crate::queries::QueryTemplates;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Record retrieval operations the sync driver consumes.
#[cfg_attr(test, mockall::automock)]
pub trait SourceApi {
    /// Records created in the window `(start, end]`.
    fn get_created(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SourceRecord>;

    /// Records modified in the window `(start, end]`.
    fn get_changed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SourceRecord>;

    /// A single record, when the source still has it.
    fn get_by_id(&self, asset_id: &str) -> Option<SourceRecord>;

    /// Every record the source will return for an unconstrained query.
    fn get_all(&self) -> Vec<SourceRecord>;
}

/// Search-API client for the portal.
pub struct PortalClient {
    http: Client,
    api_endpoint: String,
    queries: QueryTemplates,
}

impl PortalClient {
    pub fn new(api_endpoint: impl Into<String>, queries: QueryTemplates) -> AppResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_endpoint: api_endpoint.into(),
            queries,
        })
    }

    fn post_query(&self, query: String) -> Vec<SourceRecord> {
        let response = match self
            .http
            .post(&self.api_endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(query)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                warn!("Source query failed: {}", err);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            return Vec::new();
        }
        let content: Value = match response.json() {
            Ok(content) => content,
            Err(err) => {
                warn!("Source response was not valid JSON: {}", err);
                return Vec::new();
            }
        };
        records_from_response(&content)
    }
}

fn records_from_response(content: &Value) -> Vec<SourceRecord> {
    if content.get("success").and_then(Value::as_bool) != Some(true) {
        return Vec::new();
    }
    match content.get("data") {
        Some(Value::Array(records)) => records
            .iter()
            .map(|record| SourceRecord::new(record.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

impl SourceApi for PortalClient {
    fn get_created(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SourceRecord> {
        let query = self
            .queries
            .created(&format_timestamp(start), &format_timestamp(end));
        self.post_query(query)
    }

    fn get_changed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<SourceRecord> {
        let query = self
            .queries
            .modified(&format_timestamp(start), &format_timestamp(end));
        self.post_query(query)
    }

    fn get_by_id(&self, asset_id: &str) -> Option<SourceRecord> {
        let query = self.queries.by_id(asset_id);
        self.post_query(query).into_iter().next()
    }

    fn get_all(&self) -> Vec<SourceRecord> {
        self.post_query("{}".to_string())
    }
}
