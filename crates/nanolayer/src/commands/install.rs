//! Install command dispatch
//!
//! Translates parsed CLI arguments into core installer calls.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use tracing::debug;

use nanolayer_core::apk::ApkInstaller;
use nanolayer_core::apt::{AptFrontend, AptInstallOptions, AptInstaller};
use nanolayer_core::feature_installer::FeatureInstaller;
use nanolayer_core::gh_release::{GhReleaseInstaller, InstallRequest};
use nanolayer_core::host::Architecture;

use crate::cli::InstallCommands;

/// Execute one `install` subcommand
pub async fn execute(command: InstallCommands) -> Result<()> {
    debug!("dispatching install command: {:?}", command);

    match command {
        InstallCommands::DevcontainerFeature {
            feature,
            option,
            env,
            remote_user,
            verbose,
        } => {
            let installer = FeatureInstaller::new()?;
            installer
                .install(
                    &feature,
                    to_ordered_map(option),
                    to_ordered_map(env),
                    remote_user.as_deref(),
                    verbose,
                )
                .await?;
            Ok(())
        }

        InstallCommands::Apt {
            packages,
            ppas,
            force_ppas_on_non_ubuntu,
        } => apt_family(
            AptFrontend::Apt,
            &packages,
            ppas.as_deref(),
            force_ppas_on_non_ubuntu,
        ),

        InstallCommands::AptGet {
            packages,
            ppas,
            force_ppas_on_non_ubuntu,
        } => apt_family(
            AptFrontend::AptGet,
            &packages,
            ppas.as_deref(),
            force_ppas_on_non_ubuntu,
        ),

        InstallCommands::Aptitude {
            packages,
            ppas,
            force_ppas_on_non_ubuntu,
        } => apt_family(
            AptFrontend::Aptitude,
            &packages,
            ppas.as_deref(),
            force_ppas_on_non_ubuntu,
        ),

        InstallCommands::Apk { packages } => {
            let packages = split_comma_list(&packages, "packages")?;
            ApkInstaller::install(&packages)?;
            Ok(())
        }

        InstallCommands::GhRelease {
            repo,
            binary_names,
            version,
            lib_name,
            asset_regex,
            release_tag_regex,
            bin_location,
            lib_location,
            force,
            arch,
        } => {
            let binary_names = split_comma_list(&binary_names, "binary names")?;
            let arch = arch
                .map(|value| value.parse::<Architecture>())
                .transpose()?;

            let request = InstallRequest {
                lib_name,
                asset_regex,
                release_tag_regex,
                bin_location,
                lib_location,
                version,
                force,
                arch,
                ..InstallRequest::new(&repo, binary_names)
            };

            let installer = GhReleaseInstaller::new()?;
            installer.install(&request).await?;
            Ok(())
        }
    }
}

fn apt_family(
    frontend: AptFrontend,
    packages: &str,
    ppas: Option<&str>,
    force_ppas_on_non_ubuntu: bool,
) -> Result<()> {
    let packages = split_comma_list(packages, "packages")?;
    let options = AptInstallOptions {
        ppas: ppas
            .map(|list| split_comma_list(list, "ppas"))
            .transpose()?
            .unwrap_or_default(),
        force_ppas_on_non_ubuntu,
        ..Default::default()
    };

    AptInstaller::new(frontend).install(&packages, &options)?;
    Ok(())
}

/// Split a comma-separated argument, rejecting an empty list
fn split_comma_list(value: &str, what: &str) -> Result<Vec<String>> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        bail!("{} cannot be empty", what);
    }
    Ok(items)
}

/// Collect repeated key=value pairs, preserving argument order
fn to_ordered_map(pairs: Vec<(String, String)>) -> IndexMap<String, String> {
    pairs.into_iter().collect()
}
