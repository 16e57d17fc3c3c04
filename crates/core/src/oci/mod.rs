//! OCI Distribution pull support
//!
//! Devcontainer features are distributed as single-layer OCI artifacts.
//! This module parses references, speaks the registry pull protocol with
//! anonymous bearer-token upgrade, and verifies every blob against its
//! manifest digest before use.

pub mod auth;
pub mod client;
pub mod reference;
pub mod registry;

pub use client::RegistryClient;
pub use reference::OciRef;
pub use registry::{Layer, Manifest, OciRegistry};
