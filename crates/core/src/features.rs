//! Devcontainer feature metadata
//!
//! Parsing for `devcontainer-feature.json`. The format mixes boolean and
//! string option values, and new metadata keys appear regularly, so parsing
//! is duck-typed: unknown top-level keys are ignored.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::errors::{FeatureError, Result};

/// File name of the feature metadata inside the bundle
pub const DEVCONTAINER_JSON_FILENAME: &str = "devcontainer-feature.json";

/// A feature option value, boolean or string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    String(String),
}

impl OptionValue {
    /// Render for the install script environment; booleans become
    /// lowercase "true"/"false"
    pub fn as_env_value(&self) -> String {
        match self {
            OptionValue::Boolean(true) => "true".to_string(),
            OptionValue::Boolean(false) => "false".to_string(),
            OptionValue::String(s) => s.clone(),
        }
    }
}

/// A declared feature option
///
/// Definitions always carry a `default`; `enum` or `proposals` may
/// constrain or suggest values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOption {
    pub default: OptionValue,
    #[serde(default, rename = "type")]
    pub option_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "enum")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub proposals: Option<Vec<String>>,
}

/// Feature metadata from `devcontainer-feature.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    /// Feature identifier (required)
    pub id: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub documentation_url: Option<String>,

    /// Declared options, in declaration order
    #[serde(default)]
    pub options: IndexMap<String, FeatureOption>,

    /// Environment exported permanently into the image
    #[serde(default)]
    pub container_env: IndexMap<String, String>,

    /// Tooling hints (VS Code extensions and the like), carried opaquely
    #[serde(default)]
    pub customizations: Option<serde_json::Value>,
}

impl FeatureMetadata {
    /// Validate the feature contract
    pub fn validate(&self) -> std::result::Result<(), FeatureError> {
        if self.id.is_empty() {
            return Err(FeatureError::Validation {
                message: "feature id is required and cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse feature metadata from a `devcontainer-feature.json` file
pub fn parse_feature_metadata(path: &Path) -> Result<FeatureMetadata> {
    debug!("parsing feature metadata from: {}", path.display());

    if !path.exists() {
        return Err(FeatureError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let content = std::fs::read_to_string(path)?;
    let metadata: FeatureMetadata =
        serde_json::from_str(&content).map_err(|e| FeatureError::Parse {
            message: e.to_string(),
        })?;

    metadata.validate()?;
    Ok(metadata)
}
