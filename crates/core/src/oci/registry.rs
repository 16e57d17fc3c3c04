//! OCI Distribution pull operations
//!
//! Manifest and blob fetching against the `/v2/` registry API, with
//! SHA-256 verification of every blob and single-layer download/extract
//! helpers for feature bundles.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, instrument};

use super::client::RegistryClient;
use super::reference::OciRef;
use crate::archive::Archive;
use crate::errors::{InstallError, RegistryError, Result};

/// Accept header covering Docker and OCI manifest media types
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// Annotation carrying the original bundle file name
pub const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// OCI manifest (the subset the pull flow needs)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub layers: Vec<Layer>,
}

/// A content-addressed manifest layer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,
}

impl Layer {
    /// The bundle file name from the title annotation, if present
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(TITLE_ANNOTATION))
            .map(String::as_str)
    }
}

/// Pull-side registry operations
pub struct OciRegistry {
    client: RegistryClient,
    scheme: &'static str,
}

impl OciRegistry {
    /// Registry client speaking HTTPS (the normal case)
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new()?,
            scheme: "https",
        })
    }

    /// Registry client speaking plain HTTP, for local test registries
    pub fn insecure() -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new()?,
            scheme: "http",
        })
    }

    /// Fetch and decode the manifest for a reference
    #[instrument(level = "debug", skip(self))]
    pub async fn get_manifest(&self, oci_ref: &OciRef) -> Result<Manifest> {
        let url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme, oci_ref.registry, oci_ref.path, oci_ref.version
        );
        debug!("fetching manifest from: {}", url);

        let body = self.client.get(&url, &[("Accept", MANIFEST_ACCEPT)]).await?;
        serde_json::from_slice(&body).map_err(|e| {
            RegistryError::Parse {
                message: format!("failed to parse manifest: {}", e),
            }
            .into()
        })
    }

    /// Fetch a blob and verify it hashes to the requested digest
    #[instrument(level = "debug", skip(self))]
    pub async fn get_blob(&self, oci_ref: &OciRef, digest: &str) -> Result<Bytes> {
        let url = format!(
            "{}://{}/v2/{}/blobs/{}",
            self.scheme, oci_ref.registry, oci_ref.path, digest
        );
        debug!("fetching blob from: {}", url);

        let body = self.client.get(&url, &[]).await?;

        let mut hasher = Sha256::new();
        hasher.update(&body);
        let calculated = format!("sha256:{:x}", hasher.finalize());
        if calculated != digest {
            return Err(RegistryError::HashMismatch {
                calculated,
                expected: digest.to_string(),
            }
            .into());
        }

        Ok(body)
    }

    /// Download one manifest layer into `output_file`
    ///
    /// Refuses an existing output file; parent directories are created.
    pub async fn download_layer(
        &self,
        oci_ref: &OciRef,
        layer_num: usize,
        output_file: &Path,
    ) -> Result<()> {
        if output_file.exists() {
            return Err(InstallError::TargetExists {
                path: output_file.display().to_string(),
            }
            .into());
        }
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let manifest = self.get_manifest(oci_ref).await?;
        let layer = manifest
            .layers
            .get(layer_num)
            .ok_or_else(|| RegistryError::MissingLayer {
                index: layer_num,
                available: manifest.layers.len(),
            })?;

        let blob = self.get_blob(oci_ref, &layer.digest).await?;
        fs::write(output_file, &blob)?;
        Ok(())
    }

    /// Download one manifest layer and extract its tar into `output_dir`
    ///
    /// The output directory is created when missing and must be empty.
    #[instrument(level = "debug", skip(self))]
    pub async fn download_and_extract_layer(
        &self,
        oci_ref: &OciRef,
        layer_num: usize,
        output_dir: &Path,
    ) -> Result<()> {
        if output_dir.is_file() {
            return Err(InstallError::NotADirectory {
                path: output_dir.display().to_string(),
            }
            .into());
        }
        fs::create_dir_all(output_dir)?;
        if fs::read_dir(output_dir)?.next().is_some() {
            return Err(InstallError::TargetExists {
                path: format!("{} is not empty", output_dir.display()),
            }
            .into());
        }

        let manifest = self.get_manifest(oci_ref).await?;
        let layer = manifest
            .layers
            .get(layer_num)
            .ok_or_else(|| RegistryError::MissingLayer {
                index: layer_num,
                available: manifest.layers.len(),
            })?;
        let layer_file_name = layer.title().unwrap_or("layer_file.tgz").to_string();

        let download_dir = tempfile::tempdir()?;
        let layer_file = download_dir.path().join(layer_file_name);

        let blob = self.get_blob(oci_ref, &layer.digest).await?;
        fs::write(&layer_file, &blob)?;

        Archive::open(&layer_file)?.extract_all(output_dir)?;
        Ok(())
    }
}
