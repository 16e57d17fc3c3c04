//! Release asset selection
//!
//! A release typically ships one asset per platform/architecture alongside
//! checksums, packages and metadata files, all under heterogeneous naming
//! conventions. Selection runs a layered regex pipeline: an optional user
//! pattern, then negative filters that must all agree, then an ordered list
//! of positive preferences where any filter that would eliminate every
//! remaining candidate is skipped.

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::errors::{RegistryError, ResolveError, Result};
use crate::host::{Architecture, Bitness, LinuxReleaseId};
use crate::oci::RegistryClient;

/// A downloadable release asset
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiReleaseByTag {
    assets: Vec<ReleaseAsset>,
}

/// Host facts the selection pipeline keys on
#[derive(Debug, Clone)]
pub struct SelectionHost {
    pub architecture: Architecture,
    pub bitness: Bitness,
    pub release_id: LinuxReleaseId,
    pub release_id_like: LinuxReleaseId,
}

impl SelectionHost {
    /// Probe the running host, honoring an explicit architecture override
    pub fn detect(arch_override: Option<Architecture>) -> Result<Self> {
        let architecture = arch_override.unwrap_or_else(Architecture::detect);
        Ok(Self {
            architecture,
            bitness: architecture.bitness(),
            release_id: crate::host::release_id()?,
            release_id_like: crate::host::release_id_like()?,
        })
    }
}

/// Selection knobs (all filters default on)
#[derive(Debug, Clone)]
pub struct AssetResolverOptions {
    pub asset_regex: Option<String>,
    pub by_architecture: bool,
    pub by_platform: bool,
    pub by_misc: bool,
    pub by_bitness: bool,
}

impl Default for AssetResolverOptions {
    fn default() -> Self {
        Self {
            asset_regex: None,
            by_architecture: true,
            by_platform: true,
            by_misc: true,
            by_bitness: true,
        }
    }
}

/// Asset-name regex for an architecture
fn arch_regex(arch: Architecture) -> Option<&'static str> {
    match arch {
        Architecture::Armv5 => Some(r"([Aa][Rr][Mm]v5)"),
        Architecture::Armv6 => Some(r"([Aa][Rr][Mm]v6)"),
        Architecture::Armv7 => Some(r"([Aa][Rr][Mm]v7)"),
        Architecture::Armhf => Some(r"([Aa][Rr][Mm]hf)"),
        Architecture::I386 => Some(r"(i386|\-386|_386)"),
        Architecture::I686 => Some(r"(i686|\-686|_686)"),
        Architecture::Arm32 => Some(r"([Aa]rm32|ARM32)"),
        Architecture::Arm64 => Some(r"([Aa]rm64|ARM64)"),
        Architecture::S390 => Some(r"(s390x|s390)"),
        Architecture::Ppc64 => Some(r"(\-ppc|ppc64|PPC64|_ppc)"),
        Architecture::X86_64 => Some(r"([Aa]md64|\-x64|x64|x86[_-]64)"),
        Architecture::Other => None,
    }
}

const ALL_ARCHITECTURES: [Architecture; 11] = [
    Architecture::Armv5,
    Architecture::Armv6,
    Architecture::Armv7,
    Architecture::Armhf,
    Architecture::I386,
    Architecture::I686,
    Architecture::Arm32,
    Architecture::Arm64,
    Architecture::S390,
    Architecture::Ppc64,
    Architecture::X86_64,
];

fn bitness_regex(bitness: Bitness) -> &'static str {
    match bitness {
        Bitness::B32Bit => r"(32[Bb]it|32\-[Bb]it)",
        Bitness::B64Bit => r"(64[Bb]it|64\-[Bb]it)",
    }
}

const LINUX_PLATFORM_REGEX: &str = r"([Ll]inux)";

/// Non-Linux platform markers, filtered out unconditionally
const FOREIGN_PLATFORM_REGEXES: [(&str, &str); 4] = [
    (
        "windows",
        r"(windows|Windows|WINDOWS|win32|\-win\-|\.msi$|.msixbundle$|\.exe$)",
    ),
    ("android", r"([Aa]ndroid)"),
    (
        "osx",
        r"([Mm]ac[Oo][Ss]|[Mm]ac\-[Oo][Ss]|\-osx\-|_osx_|[Dd]arwin|\.dmg)",
    ),
    (
        "illumos",
        r"([Ii]llumos|[Oo]mni[oO][sS]|[Oo]pen[Ii]ndiana|[Tt]ribblix)",
    ),
];

/// Non-binary companion files (packages, checksums, certs, metadata)
const MISC_REGEXES: [(&str, &str); 4] = [
    ("packages", r"(\.deb|\.rpm|\.pkg|\.apk|\.[Aa]ppImage|\.snap)"),
    (
        "checksums",
        r"(\.sig$|\.text$|\.txt$|[Cc]hecksums|sha256|sha512|\.sha1$|\.md5$)",
    ),
    (
        "certificates",
        r"(\.pub$|\.pem$|\.crt$|\.asc$|pivkey|pkcs11key)",
    ),
    ("metadata", r"(\.json$|\.sbom$|\.blockmap$)"),
];

/// Asset-name regex for a distro identity
///
/// Alpine is widened with `musl`, the usual tell of an alpine-friendly
/// build.
fn distro_regex(id: LinuxReleaseId) -> String {
    match id {
        LinuxReleaseId::Alpine => r"(?i)(alpine|musl)".to_string(),
        other => format!("(?i)({})", other.as_str()),
    }
}

/// A compiled keep/drop predicate over asset names
struct RegexFilter {
    name: String,
    regex: Regex,
    negative: bool,
}

impl RegexFilter {
    fn new(name: &str, pattern: &str, negative: bool) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| ResolveError::AssetNotFound {
            message: format!("invalid regex {}: {}", pattern, e),
        })?;
        Ok(Self {
            name: name.to_string(),
            regex,
            negative,
        })
    }

    fn keeps(&self, asset: &ReleaseAsset) -> bool {
        let matched = self.regex.is_match(&asset.name);
        let kept = if self.negative { !matched } else { matched };
        if !kept {
            debug!(
                "'{}' filtered by {} '{}'{}",
                asset.name,
                self.name,
                self.regex.as_str(),
                if self.negative { " (negative)" } else { "" }
            );
        }
        kept
    }
}

/// Selects exactly one asset from a release
pub struct AssetResolver {
    client: RegistryClient,
    api_base: String,
}

impl AssetResolver {
    pub fn new() -> Result<Self> {
        Self::with_api_base(crate::gh_release::release::GITHUB_API_BASE)
    }

    /// Resolver pinned to an alternative API endpoint (test registries)
    pub fn with_api_base(api_base: &str) -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new()?,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the release's assets and run the selection pipeline
    #[instrument(level = "debug", skip(self, host, options))]
    pub async fn resolve(
        &self,
        repo: &str,
        release_version: &str,
        binary_names: &[String],
        host: &SelectionHost,
        options: &AssetResolverOptions,
    ) -> Result<ReleaseAsset> {
        let assets = self.release_assets(repo, release_version).await?;
        select_asset(assets, binary_names, host, options)
    }

    async fn release_assets(&self, repo: &str, tag: &str) -> Result<Vec<ReleaseAsset>> {
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, repo, tag);
        let body =
            self.client
                .get_optional(&url, &[])
                .await?
                .ok_or_else(|| ResolveError::NoRelease {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                })?;

        let release: ApiReleaseByTag =
            serde_json::from_slice(&body).map_err(|e| RegistryError::Parse {
                message: format!("failed to parse release response: {}", e),
            })?;
        Ok(release.assets)
    }
}

/// The selection pipeline over an in-memory asset list
///
/// Deterministic: the same inputs always produce the same asset or the
/// same error.
pub fn select_asset(
    mut assets: Vec<ReleaseAsset>,
    binary_names: &[String],
    host: &SelectionHost,
    options: &AssetResolverOptions,
) -> Result<ReleaseAsset> {
    // 1. the user regex short-circuits when it pins a single asset
    if let Some(pattern) = &options.asset_regex {
        let filter = RegexFilter::new("user asset regex", pattern, false)?;
        let mut matched: Vec<ReleaseAsset> =
            assets.iter().filter(|a| filter.keeps(a)).cloned().collect();
        match matched.len() {
            1 => return Ok(matched.remove(0)),
            0 => {
                return Err(ResolveError::AssetNotFound {
                    message: format!("no matches found for asset regex: {}", pattern),
                }
                .into())
            }
            count => {
                warn!(
                    "asset regex {} filtered assets down to {} candidates: {:?}; proceeding to builtin filters",
                    pattern,
                    count,
                    matched.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
                );
                assets = matched;
            }
        }
    }

    // 2. negative filters, applied as one conjunction
    let mut negative_filters = Vec::new();
    if options.by_architecture {
        for arch in ALL_ARCHITECTURES {
            if arch == host.architecture {
                continue;
            }
            if let Some(pattern) = arch_regex(arch) {
                negative_filters.push(RegexFilter::new(arch.as_str(), pattern, true)?);
            }
        }
    }
    if options.by_misc {
        for (name, pattern) in MISC_REGEXES {
            negative_filters.push(RegexFilter::new(name, pattern, true)?);
        }
    }
    if options.by_platform {
        for (name, pattern) in FOREIGN_PLATFORM_REGEXES {
            negative_filters.push(RegexFilter::new(name, pattern, true)?);
        }
    }
    if options.by_bitness {
        let foreign_bitness = match host.bitness {
            Bitness::B32Bit => Bitness::B64Bit,
            Bitness::B64Bit => Bitness::B32Bit,
        };
        negative_filters.push(RegexFilter::new(
            foreign_bitness.as_str(),
            bitness_regex(foreign_bitness),
            true,
        )?);
    }

    assets.retain(|asset| negative_filters.iter().all(|f| f.keeps(asset)));

    // 3. short-circuit when the negatives already decided
    if assets.len() == 1 {
        return Ok(assets.remove(0));
    }
    if assets.is_empty() {
        return Err(ResolveError::AssetNotFound {
            message: "no matches found".to_string(),
        }
        .into());
    }

    // 4. positive preferences, applied one by one; a filter that would
    //    eliminate every remaining candidate is skipped
    let mut positive_filters = Vec::new();
    for binary_name in binary_names {
        positive_filters.push(RegexFilter::new(
            &format!("contains binary name: {}", binary_name),
            &format!(".*{}.*", binary_name),
            false,
        )?);
    }
    if let Some(pattern) = arch_regex(host.architecture) {
        positive_filters.push(RegexFilter::new(
            host.architecture.as_str(),
            pattern,
            false,
        )?);
    }
    positive_filters.push(RegexFilter::new("linux", LINUX_PLATFORM_REGEX, false)?);
    positive_filters.push(RegexFilter::new(
        "prefer own distro",
        &distro_regex(host.release_id),
        false,
    )?);
    positive_filters.push(RegexFilter::new("prefer static", ".*static.*", false)?);
    positive_filters.push(RegexFilter::new(
        "prefer own distro-like",
        &distro_regex(host.release_id_like),
        false,
    )?);
    if host.architecture == Architecture::Arm64 {
        // plain "arm/ARM" mentions usually mean arm64
        positive_filters.push(RegexFilter::new(
            "accept plain arm",
            r"\-ARM\-?|\-arm\-",
            false,
        )?);
    }
    for distro in LinuxReleaseId::ALL {
        if distro == host.release_id || distro == host.release_id_like {
            continue;
        }
        positive_filters.push(RegexFilter::new(
            &format!("prefer non {}", distro.as_str()),
            &distro_regex(distro),
            true,
        )?);
    }

    for filter in positive_filters {
        let filtered: Vec<ReleaseAsset> =
            assets.iter().filter(|a| filter.keeps(a)).cloned().collect();
        if filtered.is_empty() {
            // the filter is too aggressive for this release; skip it
            continue;
        }
        assets = filtered;
    }

    if assets.len() > 1 {
        return Err(ResolveError::AssetAmbiguous {
            candidates: assets.into_iter().map(|a| a.name).collect(),
        }
        .into());
    }

    assets.pop().ok_or_else(|| {
        ResolveError::AssetNotFound {
            message: "no matches found".to_string(),
        }
        .into()
    })
}
