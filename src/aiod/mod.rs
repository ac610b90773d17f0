//! Destination catalog client
//!
//! Synchronous, session-backed HTTP against the AIoD catalog. Every
//! operation returns the same envelope regardless of transport outcome, so
//! callers never handle `reqwest` errors directly. The `CatalogApi` trait is
//! the seam the bridge core consumes; `AiodClient` is the production
//! implementation.

use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::errors::AppResult;

pub mod auth;

pub use auth::KeycloakAuth;

/// HTTP timeout for catalog calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Result envelope
// =============================================================================

/// Uniform outcome of one catalog operation.
///
/// `reason` is `None` only for timeouts; failed requests carry the flat list
/// of detail strings extracted from the response body, falling back to the
/// transport error message.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    pub success: bool,
    pub value: Option<Value>,
    pub reason: Option<Vec<String>>,
}

impl ApiResult {
    pub fn ok(value: Option<Value>, reason: Vec<String>) -> Self {
        Self {
            success: true,
            value,
            reason: Some(reason),
        }
    }

    pub fn failed(reason: Vec<String>) -> Self {
        Self {
            success: false,
            value: None,
            reason: Some(reason),
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            value: None,
            reason: None,
        }
    }

    /// The `identifier` field of a returned body, when present.
    pub fn identifier(&self) -> Option<i64> {
        self.value
            .as_ref()
            .and_then(|value| value.get("identifier"))
            .and_then(Value::as_i64)
    }

    pub fn reasons(&self) -> &[String] {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Flatten a response body's `detail` field into loggable strings. A plain
/// message passes through; validation entries render as `loc/loc - msg`.
pub(crate) fn format_details(content: &Value) -> Vec<String> {
    let mut details = Vec::new();
    match content.get("detail") {
        Some(Value::String(message)) => details.push(message.clone()),
        Some(Value::Array(entries)) => {
            for entry in entries {
                match (entry.get("loc"), entry.get("msg")) {
                    (Some(Value::Array(loc)), msg) => {
                        let location = loc
                            .iter()
                            .map(|step| match step {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join("/");
                        let message = msg.and_then(Value::as_str).unwrap_or_default();
                        details.push(format!("{} - {}", location, message));
                    }
                    _ => match entry {
                        Value::String(s) => details.push(s.clone()),
                        other => details.push(other.to_string()),
                    },
                }
            }
        }
        _ => {}
    }
    details
}

// =============================================================================
// Catalog contract
// =============================================================================

/// Operations the bridge core performs against the destination catalog.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogApi {
    /// Install a bearer token on the session: the supplied one verbatim, or
    /// a fresh token acquired via OIDC client credentials when the argument
    /// is empty. Returns whether a token is now installed.
    fn login(&mut self, access_token: &str) -> bool;

    /// True iff the authorization probe succeeds with the current token.
    fn is_logged_in(&self) -> bool;

    /// Forget the cached token so the next `login` re-acquires.
    fn clear_token(&mut self);

    /// Authorization probe.
    fn logged_user(&self) -> ApiResult;

    /// Catalog-wide asset counts.
    fn count(&self) -> ApiResult;

    fn get_asset(&self, asset_type: &str, identifier: i64) -> ApiResult;

    fn add_asset(&self, asset_type: &str, asset: &Value) -> ApiResult;

    /// PUT an asset body that already carries its `identifier`.
    fn update_asset(&self, asset_type: &str, asset: &Value) -> ApiResult;

    fn delete_asset(&self, identifier: i64, asset_type: &str) -> ApiResult;

    /// Lookup by publishing platform plus the resource identifier carried
    /// over from the source.
    fn get_asset_from_platform(
        &self,
        platform_name: &str,
        asset_type: &str,
        platform_resource_identifier: &str,
    ) -> ApiResult;
}

// =============================================================================
// Production client
// =============================================================================

/// Catalog client over a blocking HTTP session with bearer authorization.
pub struct AiodClient {
    http: Client,
    base_url: String,
    auth: Option<KeycloakAuth>,
    token: Option<String>,
}

impl AiodClient {
    pub fn new(base_url: impl Into<String>, auth: Option<KeycloakAuth>) -> AppResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            token: None,
        })
    }

    fn asset_endpoint(&self, asset_type: &str, identifier: i64) -> String {
        format!("{}/{}/v1/{}", self.base_url, asset_type, identifier)
    }

    fn collection_endpoint(&self, asset_type: &str) -> String {
        format!("{}/{}/v1", self.base_url, asset_type)
    }

    fn platform_endpoint(
        &self,
        platform_name: &str,
        asset_type: &str,
        platform_resource_identifier: &str,
    ) -> String {
        format!(
            "{}/platforms/{}/{}/v1/{}",
            self.base_url, platform_name, asset_type, platform_resource_identifier
        )
    }

    fn send(&self, request: RequestBuilder) -> ApiResult {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        handle_response(request.send())
    }
}

fn handle_response(result: Result<Response, reqwest::Error>) -> ApiResult {
    let response = match result {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return ApiResult::timeout(),
        Err(err) => return ApiResult::failed(vec![err.to_string()]),
    };

    let status = response.status();
    let body: Option<Value> = response.json().ok();

    if status.is_success() {
        let reason = body.as_ref().map(format_details).unwrap_or_default();
        ApiResult::ok(body, reason)
    } else {
        let details = body.as_ref().map(format_details).unwrap_or_default();
        let reason = if details.is_empty() {
            vec![format!("HTTP {}", status)]
        } else {
            details
        };
        ApiResult::failed(reason)
    }
}

impl CatalogApi for AiodClient {
    fn login(&mut self, access_token: &str) -> bool {
        if !access_token.is_empty() {
            self.token = Some(access_token.to_string());
            return true;
        }
        if self.token.is_some() {
            return true;
        }
        match &self.auth {
            Some(auth) => {
                debug!("Retrieving token from the authorization server");
                match auth.token(&self.http) {
                    Ok(token) => {
                        self.token = Some(token);
                        true
                    }
                    Err(err) => {
                        warn!("Token acquisition failed: {}", err);
                        false
                    }
                }
            }
            None => false,
        }
    }

    fn is_logged_in(&self) -> bool {
        let result = self.logged_user();
        if !result.success {
            debug!("Retrieve user failed. Reason: {:?}", result.reason);
        }
        result.success
    }

    fn clear_token(&mut self) {
        self.token = None;
    }

    fn logged_user(&self) -> ApiResult {
        let url = format!("{}/authorization_test", self.base_url);
        self.send(self.http.get(url))
    }

    fn count(&self) -> ApiResult {
        let url = format!("{}/counts/v1/", self.base_url);
        self.send(self.http.get(url))
    }

    fn get_asset(&self, asset_type: &str, identifier: i64) -> ApiResult {
        self.send(self.http.get(self.asset_endpoint(asset_type, identifier)))
    }

    fn add_asset(&self, asset_type: &str, asset: &Value) -> ApiResult {
        self.send(
            self.http
                .post(self.collection_endpoint(asset_type))
                .json(asset),
        )
    }

    fn update_asset(&self, asset_type: &str, asset: &Value) -> ApiResult {
        let identifier = match asset.get("identifier").and_then(Value::as_i64) {
            Some(identifier) => identifier,
            None => {
                return ApiResult::failed(vec![
                    "asset body is missing an identifier".to_string()
                ])
            }
        };
        self.send(
            self.http
                .put(self.asset_endpoint(asset_type, identifier))
                .json(asset),
        )
    }

    fn delete_asset(&self, identifier: i64, asset_type: &str) -> ApiResult {
        self.send(self.http.delete(self.asset_endpoint(asset_type, identifier)))
    }

    fn get_asset_from_platform(
        &self,
        platform_name: &str,
        asset_type: &str,
        platform_resource_identifier: &str,
    ) -> ApiResult {
        self.send(self.http.get(self.platform_endpoint(
            platform_name,
            asset_type,
            platform_resource_identifier,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_details_plain_message() {
        let content = json!({"detail": "There already exists a service with identifier=42"});
        assert_eq!(
            format_details(&content),
            vec!["There already exists a service with identifier=42".to_string()]
        );
    }

    #[test]
    fn test_format_details_validation_entries() {
        let content = json!({
            "detail": [
                {"loc": ["body", "name"], "msg": "field required"},
                {"loc": ["body", "tags", 0], "msg": "invalid"}
            ]
        });
        assert_eq!(
            format_details(&content),
            vec![
                "body/name - field required".to_string(),
                "body/tags/0 - invalid".to_string()
            ]
        );
    }

    #[test]
    fn test_format_details_mixed_entries() {
        let content = json!({"detail": ["plain entry"]});
        assert_eq!(format_details(&content), vec!["plain entry".to_string()]);
    }

    #[test]
    fn test_format_details_absent() {
        assert!(format_details(&json!({"identifier": 7})).is_empty());
    }

    #[test]
    fn test_api_result_identifier() {
        let result = ApiResult::ok(Some(json!({"identifier": 11})), vec![]);
        assert_eq!(result.identifier(), Some(11));
        assert_eq!(ApiResult::timeout().identifier(), None);
    }

    #[test]
    fn test_timeout_envelope_has_no_reason() {
        let result = ApiResult::timeout();
        assert!(!result.success);
        assert!(result.value.is_none());
        assert!(result.reason.is_none());
        assert!(result.reasons().is_empty());
    }

    #[test]
    fn test_endpoint_construction() {
        let client = AiodClient::new("https://api.example.org/", None).unwrap();
        assert_eq!(
            client.asset_endpoint("services", 5),
            "https://api.example.org/services/v1/5"
        );
        assert_eq!(
            client.collection_endpoint("services"),
            "https://api.example.org/services/v1"
        );
        assert_eq!(
            client.platform_endpoint("portal", "services", "abc"),
            "https://api.example.org/platforms/portal/services/v1/abc"
        );
    }

    #[test]
    fn test_update_asset_requires_identifier() {
        let client = AiodClient::new("http://localhost:1", None).unwrap();
        let result = client.update_asset("services", &json!({"name": "x"}));
        assert!(!result.success);
        assert_eq!(
            result.reasons(),
            ["asset body is missing an identifier".to_string()]
        );
    }
}
