//! Alpine package installation
//!
//! `apk update` + `apk add --no-cache` wrapped in a cache snapshot so the
//! layer keeps its pre-call `/var/cache/apk` content.

use tempfile::TempDir;
use tracing::instrument;

use crate::errors::{HostError, Result};
use crate::host::{self, LinuxReleaseId};
use crate::invoker::{self, InvokeOptions};

/// The apk cache directory
pub const APK_CACHE_DIR: &str = "/var/cache/apk";

/// Alpine installer
pub struct ApkInstaller;

impl ApkInstaller {
    pub fn is_alpine() -> Result<bool> {
        Ok(host::release_id()? == LinuxReleaseId::Alpine)
    }

    fn assert_alpine() -> Result<()> {
        if !Self::is_alpine()? {
            return Err(HostError::Unsupported {
                message: "apk should be used on alpine linux distribution".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Install packages, restoring the apk cache afterwards
    #[instrument(level = "info")]
    pub fn install(packages: &[String]) -> Result<()> {
        Self::assert_alpine()?;

        let snapshot_dir = TempDir::new()?;
        invoker::invoke(
            &format!("cp -p -R {} {}", APK_CACHE_DIR, snapshot_dir.path().display()),
            &InvokeOptions::default(),
        )?;

        let body_result = invoker::invoke("apk update", &InvokeOptions::default()).and_then(|_| {
            invoker::invoke(
                &format!("apk add --no-cache {}", packages.join(" ")),
                &InvokeOptions::default(),
            )
        });

        // no dir/* glob: alpine's ash lacks that expansion
        let cleanup_result = invoker::invoke(
            &format!(
                "rm -r {} && mv {}/apk {}",
                APK_CACHE_DIR,
                snapshot_dir.path().display(),
                APK_CACHE_DIR
            ),
            &InvokeOptions::default(),
        );

        body_result.and(cleanup_result).map(|_| ())
    }

    /// Remove packages
    #[instrument(level = "info")]
    pub fn delete(packages: &[String]) -> Result<()> {
        Self::assert_alpine()?;
        invoker::invoke(
            &format!("apk del {}", packages.join(" ")),
            &InvokeOptions::default(),
        )?;
        Ok(())
    }
}
