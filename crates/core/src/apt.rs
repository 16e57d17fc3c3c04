//! Debian-family package installation
//!
//! One flow serves `apt`, `apt-get` and `aptitude`:
//! update → optional PPA enablement → install → cleanup. The APT list
//! cache is snapshotted up front and restored afterwards so the resulting
//! image layer contains only the installed packages, and every cleanup
//! stage runs whether or not the install succeeded.

use std::path::Path;
use tempfile::TempDir;
use tracing::{instrument, warn};

use crate::errors::{HostError, Result};
use crate::host::{self, LinuxReleaseId};
use crate::invoker::{self, InvokeOptions};

/// The APT package list cache
pub const APT_LISTS_DIR: &str = "/var/lib/apt/lists";

const PPA_SUPPORT_PACKAGES: [&str; 1] = ["software-properties-common"];
/// add-apt-repository needs launchpadlib on debian proper
const PPA_SUPPORT_PACKAGES_DEBIAN: [&str; 1] = ["python3-launchpadlib"];

/// The three Debian-family front-ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AptFrontend {
    Apt,
    AptGet,
    Aptitude,
}

impl AptFrontend {
    /// The front-end's executable name
    pub fn command(&self) -> &'static str {
        match self {
            AptFrontend::Apt => "apt",
            AptFrontend::AptGet => "apt-get",
            AptFrontend::Aptitude => "aptitude",
        }
    }

    fn update_command(&self) -> String {
        format!("{} update -y", self.command())
    }

    fn install_command(&self, packages: &[String]) -> String {
        match self {
            // aptitude has no --no-install-recommends
            AptFrontend::Aptitude => format!("aptitude install -y {}", packages.join(" ")),
            _ => format!(
                "{} install -y --no-install-recommends {}",
                self.command(),
                packages.join(" ")
            ),
        }
    }

    fn clean_command(&self) -> String {
        format!("{} clean", self.command())
    }
}

/// Install knobs beyond the package list
#[derive(Debug, Clone)]
pub struct AptInstallOptions {
    pub ppas: Vec<String>,
    pub force_ppas_on_non_ubuntu: bool,
    pub clean_ppas: bool,
    pub clean_cache: bool,
    pub preserve_apt_list: bool,
}

impl Default for AptInstallOptions {
    fn default() -> Self {
        Self {
            ppas: Vec::new(),
            force_ppas_on_non_ubuntu: false,
            clean_ppas: true,
            clean_cache: true,
            preserve_apt_list: true,
        }
    }
}

/// Prepend the `ppa:` prefix where missing
pub fn normalize_ppas(ppas: &[String]) -> Vec<String> {
    ppas.iter()
        .map(|ppa| {
            if ppa.starts_with("ppa:") {
                ppa.clone()
            } else {
                format!("ppa:{}", ppa)
            }
        })
        .collect()
}

/// What this invocation changed and must undo
#[derive(Debug, Default)]
struct CleanupState {
    added_ppas: Vec<String>,
    installed_support_packages: Vec<String>,
    installed_aptitude: bool,
}

/// Debian-family installer, parameterized by front-end
pub struct AptInstaller {
    frontend: AptFrontend,
}

impl AptInstaller {
    pub fn new(frontend: AptFrontend) -> Self {
        Self { frontend }
    }

    pub fn is_ubuntu() -> Result<bool> {
        Ok(host::release_id()? == LinuxReleaseId::Ubuntu)
    }

    pub fn is_debian_like() -> Result<bool> {
        Ok(host::release_id_like()? == LinuxReleaseId::Debian)
    }

    /// Install packages as a single cache-neutral action
    #[instrument(level = "info", skip(self, options))]
    pub fn install(&self, packages: &[String], options: &AptInstallOptions) -> Result<()> {
        if !Self::is_debian_like()? {
            return Err(HostError::Unsupported {
                message: format!(
                    "{} should be used on debian-like linux distributions (debian, ubuntu, raspbian etc)",
                    self.frontend.command()
                ),
            }
            .into());
        }

        let snapshot_dir = TempDir::new()?;

        if options.preserve_apt_list {
            invoker::invoke(
                &format!(
                    "cp -p -R {} {}",
                    APT_LISTS_DIR,
                    snapshot_dir.path().display()
                ),
                &InvokeOptions::default(),
            )?;
        }

        let mut state = CleanupState::default();
        let body_result = self.run_install(packages, options, &mut state);
        let cleanup_result = self.cleanup(options, &state, snapshot_dir.path());

        // the install error wins; a cleanup error surfaces otherwise
        body_result.and(cleanup_result)
    }

    fn run_install(
        &self,
        packages: &[String],
        options: &AptInstallOptions,
        state: &mut CleanupState,
    ) -> Result<()> {
        if self.frontend == AptFrontend::Aptitude && dpkg_missing("aptitude")? {
            // bootstrap aptitude through the apt-get flow; it is purged
            // again during cleanup
            AptInstaller::new(AptFrontend::AptGet).install(
                &["aptitude".to_string()],
                &AptInstallOptions {
                    preserve_apt_list: false,
                    ..Default::default()
                },
            )?;
            state.installed_aptitude = true;
        }

        invoker::invoke(&self.frontend.update_command(), &InvokeOptions::default())?;

        let mut ppas = normalize_ppas(&options.ppas);
        if !ppas.is_empty() && !Self::is_ubuntu()? && !options.force_ppas_on_non_ubuntu {
            warn!(
                "ppas are ignored on non-ubuntu distros! in order to include them anyway use the --force-ppas-on-non-ubuntu flag"
            );
            ppas.clear();
        }

        if !ppas.is_empty() {
            for support_package in Self::required_support_packages()? {
                if dpkg_missing(support_package)? {
                    invoker::invoke(
                        &format!("apt-get install -y {}", support_package),
                        &InvokeOptions::default(),
                    )?;
                    state
                        .installed_support_packages
                        .push(support_package.to_string());
                }
            }

            for ppa in &ppas {
                invoker::invoke(
                    &format!("add-apt-repository -y {}", ppa),
                    &InvokeOptions::default(),
                )?;
                state.added_ppas.push(ppa.clone());
            }

            invoker::invoke(&self.frontend.update_command(), &InvokeOptions::default())?;
        }

        invoker::invoke(
            &self.frontend.install_command(packages),
            &InvokeOptions::default(),
        )?;
        Ok(())
    }

    /// Undo PPA and cache side effects; always runs, first error wins
    fn cleanup(
        &self,
        options: &AptInstallOptions,
        state: &CleanupState,
        snapshot_dir: &Path,
    ) -> Result<()> {
        let mut first_error: Option<crate::errors::NanolayerError> = None;
        let mut run = |result: Result<i32>| {
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        if options.clean_ppas {
            for ppa in &state.added_ppas {
                run(invoker::invoke(
                    &format!("add-apt-repository -y --remove {}", ppa),
                    &InvokeOptions::default(),
                ));
            }
            for package in &state.installed_support_packages {
                run(invoker::invoke(
                    &format!("apt-get -y purge {} --auto-remove", package),
                    &InvokeOptions::default(),
                ));
            }
        }

        if options.clean_cache {
            run(invoker::invoke(
                &self.frontend.clean_command(),
                &InvokeOptions::default(),
            ));
        }

        if state.installed_aptitude {
            run(invoker::invoke(
                "apt-get -y purge aptitude --auto-remove",
                &InvokeOptions::default(),
            ));
        }

        if options.preserve_apt_list {
            // no dir/* glob: ash (alpine) lacks that expansion
            run(invoker::invoke(
                &format!(
                    "rm -r {} && mv {}/lists {}",
                    APT_LISTS_DIR,
                    snapshot_dir.display(),
                    APT_LISTS_DIR
                ),
                &InvokeOptions::default(),
            ));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn required_support_packages() -> Result<Vec<&'static str>> {
        let mut packages: Vec<&'static str> = PPA_SUPPORT_PACKAGES.to_vec();
        if !Self::is_ubuntu()? {
            packages.extend(PPA_SUPPORT_PACKAGES_DEBIAN);
        }
        Ok(packages)
    }
}

/// Whether dpkg reports the package as absent
fn dpkg_missing(package: &str) -> Result<bool> {
    let code = invoker::invoke(
        &format!("dpkg -s {}", package),
        &InvokeOptions {
            raise_on_failure: false,
            ..Default::default()
        },
    )?;
    Ok(code != 0)
}
