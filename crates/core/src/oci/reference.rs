//! OCI reference parsing
//!
//! Reference strings follow `registry/namespace/id[:version]`, where the
//! namespace may span several path segments. The version split only applies
//! to a `:` that appears after the first `/`, so registry ports
//! (`localhost:5000/...`) survive parsing.

use serde::{Deserialize, Serialize};

use crate::errors::{RegistryError, Result};

/// A parsed OCI artifact reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciRef {
    /// Registry hostname (e.g. "ghcr.io")
    pub registry: String,
    /// Namespace path between registry and id (e.g. "devcontainers/features")
    pub namespace: String,
    /// First namespace segment (e.g. "devcontainers")
    pub owner: String,
    /// Artifact identifier (last path segment)
    pub id: String,
    /// Repository path, `namespace/id`
    pub path: String,
    /// Tag; defaults to "latest" when the reference carries none
    pub version: String,
    /// The reference without its version, `registry/namespace/id`
    pub resource: String,
}

impl OciRef {
    /// Parse a reference string
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.replace("http://", "").replace("https://", "");

        let first_slash = input.find('/');
        let (resource, version) = match (input.rfind(':'), first_slash) {
            (Some(colon), Some(slash)) if colon > slash => (
                input[..colon].to_string(),
                input[colon + 1..].to_string(),
            ),
            _ => (input.clone(), "latest".to_string()),
        };

        let segments: Vec<&str> = resource.split('/').collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(RegistryError::Parse {
                message: format!(
                    "expected registry/namespace/id reference, got: {}",
                    input
                ),
            }
            .into());
        }

        let registry = segments[0].to_string();
        let id = segments[segments.len() - 1].to_string();
        let owner = segments[1].to_string();
        let namespace = segments[1..segments.len() - 1].join("/");
        let path = format!("{}/{}", namespace, id);

        Ok(Self {
            registry,
            namespace,
            owner,
            id,
            path,
            version,
            resource,
        })
    }

    /// The full reference string, `registry/namespace/id:version`
    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.path, self.version)
    }
}
