//! Core library for the nanolayer build helper
//!
//! nanolayer keeps container image layers small by collapsing multi-step
//! install recipes into single invocations that clean up after themselves.
//! This crate holds the three install families and their shared plumbing:
//!
//! - devcontainer features pulled from OCI registries ([`feature_installer`])
//! - GitHub release binaries ([`gh_release`])
//! - Debian-family and Alpine package managers ([`apt`], [`apk`])

pub mod apk;
pub mod apt;
pub mod archive;
pub mod errors;
pub mod feature_installer;
pub mod features;
pub mod gh_release;
pub mod host;
pub mod invoker;
pub mod logging;
pub mod oci;
pub mod settings;
pub mod version;
