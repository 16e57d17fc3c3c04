//! GitHub release installation flow
//!
//! Ties release/asset/binary resolution together: downloads the selected
//! asset into a scoped temp directory, classifies it (archive, bare
//! compressed stream, raw binary), and places the result under the bin and
//! lib locations with 0755 permissions and symlinks where needed.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::archive::{self, Archive};
use crate::errors::{
    HostError, InstallError, NanolayerError, RegistryError, ResolveError, Result,
};
use crate::gh_release::asset::{AssetResolver, AssetResolverOptions, SelectionHost};
use crate::gh_release::binary;
use crate::gh_release::release::ReleaseResolver;
use crate::host::Architecture;
use crate::invoker;
use crate::oci::RegistryClient;

/// Default placement for resolved binaries
pub const DEFAULT_BIN_LOCATION: &str = "/usr/local/bin";
/// Default placement for library bundles
pub const DEFAULT_LIB_LOCATION: &str = "/usr/local/lib";

const BIN_PERMISSIONS: u32 = 0o755;

/// Parameters of one gh-release install
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub repo: String,
    pub binary_names: Vec<String>,
    pub lib_name: Option<String>,
    pub bin_location: Option<PathBuf>,
    pub lib_location: Option<PathBuf>,
    pub asset_regex: Option<String>,
    pub release_tag_regex: Option<String>,
    pub version: String,
    pub force: bool,
    pub arch: Option<Architecture>,
    pub filter_assets_by_architecture: bool,
    pub filter_assets_by_platform: bool,
    pub filter_assets_by_misc: bool,
    pub filter_assets_by_bitness: bool,
}

impl InstallRequest {
    /// A request with default placement and filtering
    pub fn new(repo: &str, binary_names: Vec<String>) -> Self {
        Self {
            repo: repo.to_string(),
            binary_names,
            lib_name: None,
            bin_location: None,
            lib_location: None,
            asset_regex: None,
            release_tag_regex: None,
            version: "latest".to_string(),
            force: false,
            arch: None,
            filter_assets_by_architecture: true,
            filter_assets_by_platform: true,
            filter_assets_by_misc: true,
            filter_assets_by_bitness: true,
        }
    }
}

/// Installs binaries from GitHub release assets
pub struct GhReleaseInstaller {
    releases: ReleaseResolver,
    assets: AssetResolver,
    client: RegistryClient,
}

impl GhReleaseInstaller {
    pub fn new() -> Result<Self> {
        Ok(Self {
            releases: ReleaseResolver::new()?,
            assets: AssetResolver::new()?,
            client: RegistryClient::new()?,
        })
    }

    /// Installer pinned to an alternative API endpoint (test registries)
    pub fn with_api_base(api_base: &str) -> Result<Self> {
        Ok(Self {
            releases: ReleaseResolver::with_api_base(api_base)?,
            assets: AssetResolver::with_api_base(api_base)?,
            client: RegistryClient::new()?,
        })
    }

    /// Run the full install flow for `request`
    #[instrument(level = "info", skip(self, request), fields(repo = %request.repo))]
    pub async fn install(&self, request: &InstallRequest) -> Result<()> {
        let lib_name = match (request.lib_name.as_deref(), request.binary_names.as_slice()) {
            (Some(name), _) if !name.is_empty() => name.to_string(),
            (_, [single]) => single.clone(),
            _ => return Err(InstallError::LibNameRequired.into()),
        };

        if !cfg!(target_os = "linux") {
            return Err(HostError::Unsupported {
                message: format!(
                    "currently only the Linux platform is supported (got {})",
                    std::env::consts::OS
                ),
            }
            .into());
        }

        invoker::check_root_privileges()?;

        let bin_location =
            resolve_and_validate_dir(request.bin_location.as_deref(), DEFAULT_BIN_LOCATION)?;
        let lib_location =
            resolve_and_validate_dir(request.lib_location.as_deref(), DEFAULT_LIB_LOCATION)?;

        let mut final_binary_locations = Vec::new();
        for binary_name in &request.binary_names {
            let target = bin_location.join(binary_name);
            if target.exists() && !request.force {
                return Err(InstallError::TargetExists {
                    path: target.display().to_string(),
                }
                .into());
            }
            final_binary_locations.push(target);
        }

        let host = SelectionHost::detect(request.arch)?;
        let resolver_options = AssetResolverOptions {
            asset_regex: request.asset_regex.clone(),
            by_architecture: request.filter_assets_by_architecture,
            by_platform: request.filter_assets_by_platform,
            by_misc: request.filter_assets_by_misc,
            by_bitness: request.filter_assets_by_bitness,
        };

        let tag = self
            .releases
            .resolve(
                &request.version,
                &request.repo,
                request.release_tag_regex.as_deref(),
                false,
            )
            .await?;

        let resolved_asset = match self
            .assets
            .resolve(
                &request.repo,
                &tag,
                &request.binary_names,
                &host,
                &resolver_options,
            )
            .await
        {
            Ok(asset) => asset,
            Err(NanolayerError::Resolve(ResolveError::NoRelease { .. })) => {
                // git tags may exist without a release object; re-resolve the
                // tag through the API and retry once
                let tag = self
                    .releases
                    .resolve(
                        &request.version,
                        &request.repo,
                        request.release_tag_regex.as_deref(),
                        true,
                    )
                    .await?;
                self.assets
                    .resolve(
                        &request.repo,
                        &tag,
                        &request.binary_names,
                        &host,
                        &resolver_options,
                    )
                    .await?
            }
            Err(e) => return Err(e),
        };

        info!("resolved asset: {}", resolved_asset.name);

        let tempdir = tempfile::tempdir()?;
        let asset_path = tempdir.path().join("asset");
        self.download_asset(&resolved_asset.browser_download_url, &asset_path)
            .await?;

        place_asset(&Placement {
            asset_name: &resolved_asset.name,
            asset_path: &asset_path,
            workdir: tempdir.path(),
            binary_names: &request.binary_names,
            final_binary_locations: &final_binary_locations,
            lib_location: &lib_location,
            lib_name: &lib_name,
            force: request.force,
        })
    }

    async fn download_asset(&self, url: &str, target: &Path) -> Result<()> {
        if !url.starts_with("http") {
            return Err(RegistryError::Network {
                message: format!("only http/https links are permitted, got: {}", url),
            }
            .into());
        }
        if target.exists() {
            return Err(InstallError::TargetExists {
                path: target.display().to_string(),
            }
            .into());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("downloading asset from: {}", url);
        let body = self.client.get(url, &[]).await?;
        fs::write(target, &body)?;
        Ok(())
    }
}

/// Inputs of the classification + placement stage
struct Placement<'a> {
    asset_name: &'a str,
    asset_path: &'a Path,
    workdir: &'a Path,
    binary_names: &'a [String],
    final_binary_locations: &'a [PathBuf],
    lib_location: &'a Path,
    lib_name: &'a str,
    force: bool,
}

/// Classify the downloaded asset and place binaries/libraries
fn place_asset(placement: &Placement<'_>) -> Result<()> {
    if Archive::is_archive(placement.asset_path) {
        info!("asset recognized as an archive file");
        return place_from_archive(placement);
    }

    if let Some(kind) = archive::compressed_kind(placement.asset_path)? {
        info!("asset recognized as a {} file", kind.as_str());
        let [target] = placement.final_binary_locations else {
            return Err(InstallError::SingleFileAsset.into());
        };
        archive::decompress(kind, placement.asset_path, target)?;
        recursive_chmod(target, BIN_PERMISSIONS)?;
        return Ok(());
    }

    info!("asset recognized as a binary");
    let [target] = placement.final_binary_locations else {
        return Err(InstallError::SingleFileAsset.into());
    };
    fs::copy(placement.asset_path, target)?;
    recursive_chmod(target, BIN_PERMISSIONS)?;
    Ok(())
}

fn place_from_archive(placement: &Placement<'_>) -> Result<()> {
    let archive = Archive::open(placement.asset_path)?;
    let archive_member_names = binary::resolve(&archive, placement.binary_names)?;
    info!("binary members found in archive: {:?}", archive_member_names);

    let extraction_path = placement.workdir.join("extraction");
    fs::create_dir_all(&extraction_path)?;

    if archive.file_members()?.len() > placement.binary_names.len() {
        // other files ride along: treat the whole archive as a library
        // bundle and link the binaries out of it
        info!("archive recognized as library (contains additional files outside of requested binaries)");
        let target_lib_location = placement.lib_location.join(placement.lib_name);

        info!(
            "extracting {} into {}",
            placement.asset_name,
            target_lib_location.display()
        );

        if target_lib_location.exists() && !placement.force {
            return Err(InstallError::TargetExists {
                path: target_lib_location.display().to_string(),
            }
            .into());
        }

        archive.extract_all(&extraction_path)?;
        copy_tree(&extraction_path, &target_lib_location, placement.force)?;
        recursive_chmod(&target_lib_location, BIN_PERMISSIONS)?;

        for (member, final_binary_location) in archive_member_names
            .iter()
            .zip(placement.final_binary_locations)
        {
            let lib_binary_location = target_lib_location.join(member);
            info!(
                "linking {} to {}",
                lib_binary_location.display(),
                final_binary_location.display()
            );
            if let Err(e) = symlink(&lib_binary_location, final_binary_location) {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    // an existing target is replaced, symlink or not
                    fs::remove_file(final_binary_location)?;
                    symlink(&lib_binary_location, final_binary_location)?;
                } else {
                    return Err(e.into());
                }
            }
        }
    } else {
        // the archive holds exactly the requested binaries: place each one
        // under the bin location, renamed to its requested name
        for ((member, binary_name), final_binary_location) in archive_member_names
            .iter()
            .zip(placement.binary_names)
            .zip(placement.final_binary_locations)
        {
            archive.extract(member, &extraction_path)?;
            if member != binary_name {
                info!("renaming {} to {}", member, binary_name);
            }
            fs::copy(extraction_path.join(member), final_binary_location)?;
            recursive_chmod(final_binary_location, BIN_PERMISSIONS)?;
        }
    }

    Ok(())
}

/// Use the given directory or the default; it must not be a file
fn resolve_and_validate_dir(location: Option<&Path>, default: &str) -> Result<PathBuf> {
    let dir = location
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default));

    if dir.is_file() {
        return Err(InstallError::NotADirectory {
            path: dir.display().to_string(),
        }
        .into());
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Apply `mode` to a path and everything beneath it
fn recursive_chmod(path: &Path, mode: u32) -> Result<()> {
    if path.is_symlink() {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    if path.is_dir() {
        for entry in fs::read_dir(path)? {
            recursive_chmod(&entry?.path(), mode)?;
        }
    }
    Ok(())
}

/// Copy a directory tree; with `merge`, existing directories are reused
/// and existing files overwritten
fn copy_tree(source: &Path, target: &Path, merge: bool) -> Result<()> {
    if target.exists() && !merge {
        return Err(InstallError::TargetExists {
            path: target.display().to_string(),
        }
        .into());
    }
    fs::create_dir_all(target)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest, merge)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if dest.is_symlink() || dest.exists() {
                fs::remove_file(&dest)?;
            }
            symlink(&link, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, *name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    struct Fixture {
        _tmp: TempDir,
        workdir: PathBuf,
        asset_path: PathBuf,
        bin_location: PathBuf,
        lib_location: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let workdir = tmp.path().join("work");
        let bin_location = tmp.path().join("bin");
        let lib_location = tmp.path().join("lib");
        fs::create_dir_all(&workdir).unwrap();
        fs::create_dir_all(&bin_location).unwrap();
        fs::create_dir_all(&lib_location).unwrap();
        Fixture {
            asset_path: workdir.join("asset"),
            workdir,
            bin_location,
            lib_location,
            _tmp: tmp,
        }
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_single_binary_archive_is_renamed() {
        let fx = fixture();
        write_tar_gz(&fx.asset_path, &[("kubectx_v0.9.5", b"the binary", 0o644)]);

        let target = fx.bin_location.join("kubectx");
        place_asset(&Placement {
            asset_name: "kubectx_v0.9.5_linux_x86_64.tar.gz",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["kubectx".to_string()],
            final_binary_locations: &[target.clone()],
            lib_location: &fx.lib_location,
            lib_name: "kubectx",
            force: false,
        })
        .unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"the binary");
        assert_eq!(mode_of(&target), 0o755);
        assert!(!fx.lib_location.join("kubectx").exists());
    }

    #[test]
    fn test_library_bundle_is_linked() {
        let fx = fixture();
        write_tar_gz(
            &fx.asset_path,
            &[
                ("btop/bin/btop", b"binary", 0o755),
                ("btop/README.md", b"docs", 0o644),
                ("btop/themes/default.theme", b"theme", 0o644),
            ],
        );

        let target = fx.bin_location.join("btop");
        place_asset(&Placement {
            asset_name: "btop-x86_64-linux-musl.tbz",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["btop".to_string()],
            final_binary_locations: &[target.clone()],
            lib_location: &fx.lib_location,
            lib_name: "btop",
            force: false,
        })
        .unwrap();

        let lib_dir = fx.lib_location.join("btop");
        assert!(lib_dir.join("btop/README.md").exists());
        assert_eq!(mode_of(&lib_dir.join("btop/bin/btop")), 0o755);

        assert!(target.is_symlink());
        assert_eq!(
            fs::read_link(&target).unwrap(),
            lib_dir.join("btop/bin/btop")
        );
        assert_eq!(fs::read(&target).unwrap(), b"binary");
    }

    #[test]
    fn test_library_bundle_refuses_existing_lib_dir() {
        let fx = fixture();
        write_tar_gz(
            &fx.asset_path,
            &[
                ("tool/tool", b"binary", 0o755),
                ("tool/LICENSE", b"mit", 0o644),
            ],
        );
        fs::create_dir_all(fx.lib_location.join("tool")).unwrap();

        let result = place_asset(&Placement {
            asset_name: "tool.tar.gz",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["tool".to_string()],
            final_binary_locations: &[fx.bin_location.join("tool")],
            lib_location: &fx.lib_location,
            lib_name: "tool",
            force: false,
        });
        assert!(matches!(
            result,
            Err(NanolayerError::Install(InstallError::TargetExists { .. }))
        ));
    }

    #[test]
    fn test_symlink_overrides_existing_regular_file() {
        let fx = fixture();
        write_tar_gz(
            &fx.asset_path,
            &[
                ("tool/tool", b"binary", 0o755),
                ("tool/LICENSE", b"mit", 0o644),
            ],
        );
        let target = fx.bin_location.join("tool");
        fs::write(&target, b"old regular file").unwrap();

        place_asset(&Placement {
            asset_name: "tool.tar.gz",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["tool".to_string()],
            final_binary_locations: &[target.clone()],
            lib_location: &fx.lib_location,
            lib_name: "tool",
            force: true,
        })
        .unwrap();

        // the pre-existing regular file is replaced by the symlink
        assert!(target.is_symlink());
    }

    #[test]
    fn test_gzip_stream_is_decompressed() {
        let fx = fixture();
        let file = File::create(&fx.asset_path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"raw tool bytes").unwrap();
        encoder.finish().unwrap();

        let target = fx.bin_location.join("tool");
        place_asset(&Placement {
            asset_name: "tool.gz",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["tool".to_string()],
            final_binary_locations: &[target.clone()],
            lib_location: &fx.lib_location,
            lib_name: "tool",
            force: false,
        })
        .unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"raw tool bytes");
        assert_eq!(mode_of(&target), 0o755);
    }

    #[test]
    fn test_raw_binary_is_copied() {
        let fx = fixture();
        fs::write(&fx.asset_path, b"\x7fELF binary").unwrap();

        let target = fx.bin_location.join("tool");
        place_asset(&Placement {
            asset_name: "tool-linux-amd64",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["tool".to_string()],
            final_binary_locations: &[target.clone()],
            lib_location: &fx.lib_location,
            lib_name: "tool",
            force: false,
        })
        .unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"\x7fELF binary");
        assert_eq!(mode_of(&target), 0o755);
    }

    #[test]
    fn test_single_file_asset_with_multiple_names_fails() {
        let fx = fixture();
        fs::write(&fx.asset_path, b"\x7fELF binary").unwrap();

        let result = place_asset(&Placement {
            asset_name: "tool-linux-amd64",
            asset_path: &fx.asset_path,
            workdir: &fx.workdir,
            binary_names: &["a".to_string(), "b".to_string()],
            final_binary_locations: &[fx.bin_location.join("a"), fx.bin_location.join("b")],
            lib_location: &fx.lib_location,
            lib_name: "tools",
            force: false,
        });
        assert!(matches!(
            result,
            Err(NanolayerError::Install(InstallError::SingleFileAsset))
        ));
    }

    #[test]
    fn test_resolve_and_validate_dir() {
        let tmp = TempDir::new().unwrap();
        let new_dir = tmp.path().join("bin");
        let resolved = resolve_and_validate_dir(Some(&new_dir), "/unused").unwrap();
        assert_eq!(resolved, new_dir);
        assert!(new_dir.is_dir());

        let file = tmp.path().join("a-file");
        fs::write(&file, b"x").unwrap();
        assert!(resolve_and_validate_dir(Some(&file), "/unused").is_err());
    }

    #[test]
    fn test_recursive_chmod() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("tree/inner");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file"), b"x").unwrap();

        recursive_chmod(&tmp.path().join("tree"), 0o755).unwrap();
        assert_eq!(mode_of(&dir), 0o755);
        assert_eq!(mode_of(&dir.join("file")), 0o755);
    }
}
