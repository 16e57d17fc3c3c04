//! GitHub release binary installation
//!
//! Resolves a repository's release tags, picks the one asset that fits the
//! host, classifies the download, and places binaries (and library bundles)
//! at stable locations.

pub mod asset;
pub mod binary;
pub mod installer;
pub mod release;

pub use asset::{AssetResolver, AssetResolverOptions, ReleaseAsset, SelectionHost};
pub use installer::{GhReleaseInstaller, InstallRequest};
pub use release::ReleaseResolver;
