//! HTTP client for registry and release endpoints
//!
//! One `reqwest` client shared by the OCI registry and the GitHub API
//! callers. Every request carries the nanolayer User-Agent; unauthorized
//! registry responses are retried once after a bearer-token exchange.

use bytes::Bytes;
use tracing::debug;

use super::auth;
use crate::errors::{RegistryError, Result};

/// User-Agent sent on every outbound request
pub const USER_AGENT: &str = concat!("nanolayer/", env!("CARGO_PKG_VERSION"));

/// HTTP client with anonymous → bearer-token upgrade
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
}

impl RegistryClient {
    /// Build a client with the nanolayer User-Agent
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RegistryError::Network {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }

    /// Access to the underlying reqwest client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// GET a URL, upgrading to bearer-token auth on a 401 challenge
    ///
    /// The token is used for the single retry and discarded.
    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Bytes> {
        let mut request = self.http.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| RegistryError::Network {
            message: format!("request failed for {}: {}", url, e),
        })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let challenge_header = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| RegistryError::Auth {
                    message: format!("401 without WWW-Authenticate header for {}", url),
                })?;

            debug!("got 401 with bearer challenge, attempting token exchange");
            let challenge = auth::parse_www_authenticate(&challenge_header)?;
            let token = auth::fetch_token(&self.http, &challenge).await?;

            let mut retry = self
                .http
                .get(url)
                .header("Authorization", format!("Bearer {}", token));
            for (name, value) in headers {
                retry = retry.header(*name, *value);
            }

            let retry_response = retry.send().await.map_err(|e| RegistryError::Network {
                message: format!("request failed for {}: {}", url, e),
            })?;

            if !retry_response.status().is_success() {
                return Err(RegistryError::Auth {
                    message: format!(
                        "authentication failed for {} (HTTP {})",
                        url,
                        retry_response.status()
                    ),
                }
                .into());
            }

            return retry_response
                .bytes()
                .await
                .map_err(|e| {
                    RegistryError::Network {
                        message: format!("failed to read response body from {}: {}", url, e),
                    }
                    .into()
                });
        }

        if !response.status().is_success() {
            return Err(RegistryError::Network {
                message: format!("HTTP {} for {}", response.status(), url),
            }
            .into());
        }

        response.bytes().await.map_err(|e| {
            RegistryError::Network {
                message: format!("failed to read response body from {}: {}", url, e),
            }
            .into()
        })
    }

    /// GET a URL and report a 404 distinctly from other failures
    ///
    /// Returns `Ok(None)` on 404 so callers can run their fallback paths.
    pub async fn get_optional(&self, url: &str, headers: &[(&str, &str)]) -> Result<Option<Bytes>> {
        let mut request = self.http.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await.map_err(|e| RegistryError::Network {
            message: format!("request failed for {}: {}", url, e),
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::Network {
                message: format!("HTTP {} for {}", response.status(), url),
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| RegistryError::Network {
            message: format!("failed to read response body from {}: {}", url, e),
        })?;
        Ok(Some(bytes))
    }
}
