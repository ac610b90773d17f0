//! OIDC token acquisition
//!
//! Client-credentials grant against the catalog's authorization server. The
//! client only ever needs the access token string; refresh is handled by
//! clearing the cached token and logging in again.

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};

/// Authorization-server coordinates for the client-credentials grant.
#[derive(Debug, Clone)]
pub struct KeycloakAuth {
    server_url: String,
    realm: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl KeycloakAuth {
    pub fn new(
        server_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn token_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.server_url.trim_end_matches('/'),
            self.realm
        )
    }

    /// Acquire an access token.
    pub fn token(&self, http: &Client) -> AppResult<String> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = http.post(self.token_endpoint()).form(&params).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::authentication(format!(
                "token endpoint returned HTTP {}",
                status
            )));
        }
        let token: TokenResponse = response
            .json()
            .map_err(|_| AppError::authentication("token response missing access_token"))?;
        Ok(token.access_token)
    }
}
