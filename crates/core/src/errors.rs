//! Error types and handling
//!
//! Domain-specific error types for every install family, rolled up into a
//! single [`NanolayerError`] that the CLI surfaces as a non-zero exit.

use thiserror::Error;

/// Top-level error for the nanolayer core library
#[derive(Error, Debug)]
pub enum NanolayerError {
    /// Host precondition failures (privileges, platform, distro family)
    #[error(transparent)]
    Host(#[from] HostError),

    /// Child command failures
    #[error(transparent)]
    Command(#[from] CommandError),

    /// OCI registry protocol failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Release/asset/binary resolution failures
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Archive inspection and extraction failures
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Devcontainer feature failures
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// Installation placement failures
    #[error(transparent)]
    Install(#[from] InstallError),

    /// Underlying I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results with NanolayerError
pub type Result<T> = std::result::Result<T, NanolayerError>;

/// Host precondition errors
#[derive(Error, Debug)]
pub enum HostError {
    /// A privileged operation was attempted without root
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The host platform/distro cannot run the requested installer
    #[error("unsupported host: {message}")]
    Unsupported { message: String },
}

/// Child process errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// The command ran and exited non-zero
    #[error("the command '{command}' failed with return code {code}")]
    Failed { command: String, code: i32 },

    /// The command could not be spawned at all
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// OCI registry protocol errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Transport-level failure
    #[error("registry network error: {message}")]
    Network { message: String },

    /// Token exchange or credential failure
    #[error("registry authentication error: {message}")]
    Auth { message: String },

    /// Blob content does not hash to the manifest digest
    #[error("bad calculated digest: {calculated} (expected {expected})")]
    HashMismatch {
        calculated: String,
        expected: String,
    },

    /// The manifest does not carry the requested layer
    #[error("manifest has no layer at index {index} ({available} available)")]
    MissingLayer { index: usize, available: usize },

    /// Response body could not be decoded
    #[error("failed to parse registry response: {message}")]
    Parse { message: String },
}

/// Release, asset and binary resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The asked version does not name any release tag
    #[error("could not find a release for asked version: {version}")]
    ReleaseNotFound { version: String },

    /// The release tag has no published release object (API 404)
    #[error("no release exists for repo {repo} and tag {tag}")]
    NoRelease { repo: String, tag: String },

    /// Asset filtering eliminated every candidate
    #[error("no matching asset found: {message}")]
    AssetNotFound { message: String },

    /// Asset filtering left more than one candidate
    #[error("too many asset matches found: {candidates:?}")]
    AssetAmbiguous { candidates: Vec<String> },

    /// No archive member matches the requested binary name
    #[error("no binary named {name} found in archive")]
    BinaryNotFound { name: String },

    /// Several archive members match the requested binary name
    #[error("multiple binary matches were found in archive: {candidates:?}")]
    BinaryAmbiguous { candidates: Vec<String> },

    /// Multiple binary names were requested but the archive holds one file
    #[error("multiple binary names given, but only one member in archive: {member}")]
    SingleMemberArchive { member: String },
}

/// Archive handling errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The file is neither a tar (optionally compressed) nor a zip
    #[error("unsupported archive: {path}")]
    Unsupported { path: String },

    /// A named member does not exist in the archive
    #[error("archive has no member named {name}")]
    MissingMember { name: String },

    /// The archive contents could not be read
    #[error("malformed archive: {message}")]
    Malformed { message: String },

    /// An entry would escape the extraction root
    #[error("archive member {name} escapes the extraction directory")]
    UnsafeMember { name: String },
}

/// Devcontainer feature errors
#[derive(Error, Debug)]
pub enum FeatureError {
    /// devcontainer-feature.json is missing from the bundle
    #[error("feature metadata not found: {path}")]
    NotFound { path: String },

    /// devcontainer-feature.json could not be decoded
    #[error("failed to parse feature metadata: {message}")]
    Parse { message: String },

    /// The metadata violates the feature contract
    #[error("feature validation error: {message}")]
    Validation { message: String },
}

/// Installation placement errors
#[derive(Error, Debug)]
pub enum InstallError {
    /// A target path already exists and --force was not given
    #[error("target {path} already exists")]
    TargetExists { path: String },

    /// A location that must be a directory is a file
    #[error("{path} should be a folder - got file")]
    NotADirectory { path: String },

    /// Multiple binary names require an explicit library name
    #[error("if multiple binary names given, lib name has to be given as well")]
    LibNameRequired,

    /// The resolved asset is a single file but several binaries were asked
    #[error("multiple binary names given but the resolved asset is a single binary file")]
    SingleFileAsset,
}
