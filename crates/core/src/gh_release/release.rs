//! Release tag resolution
//!
//! Turns a user-supplied version ("latest" or a concrete tag) into an
//! existing release tag. Tags are enumerated through `git ls-remote` when a
//! git binary is available, falling back to the GitHub releases API, and
//! sorted with the natural-order comparator (tags are not reliably SemVer).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::process::Command;
use tracing::{debug, instrument};

use crate::errors::{RegistryError, ResolveError, Result};
use crate::oci::RegistryClient;
use crate::version::natural_sort;

/// Matches `refs/tags/<tag>` lines in `git ls-remote` output
static GIT_VERSION_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:tags/)([0-9A-Za-z\-_|.]+)\\?$").expect("tag regex is valid")
});

#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
}

/// Default GitHub API endpoint
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Resolves asked versions to concrete release tags
pub struct ReleaseResolver {
    client: RegistryClient,
    api_base: String,
    prefer_api: bool,
}

impl ReleaseResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new()?,
            api_base: GITHUB_API_BASE.to_string(),
            prefer_api: false,
        })
    }

    /// Resolver pinned to an alternative API endpoint (test registries);
    /// always enumerates through the API instead of `git ls-remote`
    pub fn with_api_base(api_base: &str) -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new()?,
            api_base: api_base.trim_end_matches('/').to_string(),
            prefer_api: true,
        })
    }

    /// Resolve `asked_version` against the repo's tags
    ///
    /// `use_github_api` forces API enumeration even when git is available
    /// (used by the installer's retry after a git tag with no release).
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(
        &self,
        asked_version: &str,
        repo: &str,
        tag_regex: Option<&str>,
        use_github_api: bool,
    ) -> Result<String> {
        let tags = self.version_tags(repo, tag_regex, use_github_api).await?;
        pick_version(asked_version, tags)
    }

    async fn version_tags(
        &self,
        repo: &str,
        tag_regex: Option<&str>,
        use_github_api: bool,
    ) -> Result<Vec<String>> {
        let mut tags = if !use_github_api && !self.prefer_api && git_exists() {
            tags_from_git(repo)?
        } else {
            self.tags_from_api(repo).await?
        };

        if let Some(pattern) = tag_regex {
            let regex = Regex::new(pattern).map_err(|e| ResolveError::ReleaseNotFound {
                version: format!("invalid tag regex {}: {}", pattern, e),
            })?;
            // anchored at the start, like a match (not a search)
            tags.retain(|tag| regex.find(tag).is_some_and(|m| m.start() == 0));
        }

        debug!("found {} candidate tags for {}", tags.len(), repo);
        Ok(tags)
    }

    async fn tags_from_api(&self, repo: &str) -> Result<Vec<String>> {
        let url = format!("{}/repos/{}/releases", self.api_base, repo);
        let body = self.client.get(&url, &[]).await?;
        let releases: Vec<ApiRelease> =
            serde_json::from_slice(&body).map_err(|e| RegistryError::Parse {
                message: format!("failed to parse releases response: {}", e),
            })?;
        Ok(releases.into_iter().map(|r| r.tag_name).collect())
    }
}

/// Whether a usable git binary is on PATH
fn git_exists() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn tags_from_git(repo: &str) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args([
            "ls-remote",
            "--tags",
            &format!("https://github.com/{}", repo),
        ])
        .output();

    match output {
        Ok(output) if output.status.success() => Ok(parse_ls_remote_output(
            &String::from_utf8_lossy(&output.stdout),
        )),
        _ => Ok(Vec::new()),
    }
}

/// Extract version tags from `git ls-remote --tags` output
///
/// Keeps tags whose leading character (after a stripped `v`) is
/// alphanumeric, which discards peeled refs and decoration noise.
fn parse_ls_remote_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            GIT_VERSION_TAG_REGEX
                .captures(line.trim())
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
        })
        .filter(|tag| {
            tag.strip_prefix('v')
                .unwrap_or(tag)
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
        })
        .collect()
}

/// Choose the tag that satisfies `asked_version`
fn pick_version(asked_version: &str, mut tags: Vec<String>) -> Result<String> {
    if asked_version == "latest" {
        natural_sort(&mut tags);
        return tags.pop().ok_or_else(|| {
            ResolveError::ReleaseNotFound {
                version: asked_version.to_string(),
            }
            .into()
        });
    }

    if tags.iter().any(|tag| tag == asked_version) {
        return Ok(asked_version.to_string());
    }
    let with_v = format!("v{}", asked_version);
    if tags.iter().any(|tag| *tag == with_v) {
        return Ok(with_v);
    }

    Err(ResolveError::ReleaseNotFound {
        version: asked_version.to_string(),
    }
    .into())
}
