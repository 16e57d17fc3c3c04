//! Registry token authentication
//!
//! Anonymous pulls from public registries answer the first request with 401
//! and a `WWW-Authenticate: Bearer` challenge. The challenge names a token
//! server; exchanging the challenge there yields a short-lived bearer token
//! scoped to the requested repository.

use tracing::debug;

use crate::errors::{RegistryError, Result};

/// A parsed `WWW-Authenticate: Bearer` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// The token-server URL for this challenge
    pub fn token_url(&self) -> String {
        let mut url = self.realm.clone();
        let mut params = Vec::new();
        if let Some(service) = &self.service {
            params.push(format!("service={}", service));
        }
        if let Some(scope) = &self.scope {
            params.push(format!("scope={}", scope));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}

/// Parse a `WWW-Authenticate` header value into a bearer challenge
pub fn parse_www_authenticate(header: &str) -> Result<BearerChallenge> {
    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    if let Some(params) = header.strip_prefix("Bearer ") {
        for param in params.split(',') {
            let param = param.trim();
            if let Some((key, value)) = param.split_once('=') {
                let value = value.trim_matches('"');
                match key {
                    "realm" => realm = Some(value.to_string()),
                    "service" => service = Some(value.to_string()),
                    "scope" => scope = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    let realm = realm.ok_or_else(|| RegistryError::Auth {
        message: format!("missing Bearer realm in WWW-Authenticate header: {}", header),
    })?;

    Ok(BearerChallenge {
        realm,
        service,
        scope,
    })
}

/// Exchange a bearer challenge for a token
///
/// Tokens are single-use within one registry call and never cached.
pub async fn fetch_token(client: &reqwest::Client, challenge: &BearerChallenge) -> Result<String> {
    let token_url = challenge.token_url();
    debug!("exchanging for registry token at: {}", token_url);

    let response = client
        .get(&token_url)
        .send()
        .await
        .map_err(|e| RegistryError::Network {
            message: format!("token request failed: {}", e),
        })?;

    if !response.status().is_success() {
        return Err(RegistryError::Auth {
            message: format!("token exchange failed with status: {}", response.status()),
        }
        .into());
    }

    let body: serde_json::Value = response.json().await.map_err(|e| RegistryError::Parse {
        message: format!("token response is not JSON: {}", e),
    })?;

    body.get("token")
        .or_else(|| body.get("access_token"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RegistryError::Auth {
                message: "token not found in token-server response".to_string(),
            }
            .into()
        })
}
