//! CLI surface
//!
//! `nanolayer install <family> ...` with one subcommand per install family.
//! Key=value arguments (`--option`, `--env`) are validated at parse time
//! and accumulate in the order given.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::install;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Keep your container image layers as small as possible",
    long_about = "nanolayer compresses multi-step install recipes into single, \
                  cache-friendly commands that leave behind a minimal filesystem delta."
)]
pub struct Cli {
    /// Print the release version of this binary and exit
    #[arg(long)]
    pub release_version: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a package, binary, or devcontainer feature
    #[command(subcommand)]
    Install(InstallCommands),
}

#[derive(Subcommand, Debug)]
pub enum InstallCommands {
    /// Install a devcontainer feature from an OCI registry
    DevcontainerFeature {
        /// Feature reference (e.g. ghcr.io/devcontainers/features/node:1)
        feature: String,

        /// Feature option, formatted as key=value (repeatable)
        #[arg(long = "option", value_parser = parse_key_val)]
        option: Vec<(String, String)>,

        /// Extra environment entry, formatted as key=value (repeatable)
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// User the feature should configure (probed when omitted)
        #[arg(long)]
        remote_user: Option<String>,

        /// Run the install script with shell tracing
        #[arg(long)]
        verbose: bool,
    },

    /// Install apt packages without growing the layer
    Apt {
        /// Comma-separated list of apt packages
        packages: String,

        /// Comma-separated list of PPAs to enable for the install
        #[arg(long)]
        ppas: Option<String>,

        /// Apply PPAs even on non-ubuntu debian-like distros
        #[arg(long)]
        force_ppas_on_non_ubuntu: bool,
    },

    /// Install apt-get packages without growing the layer
    AptGet {
        /// Comma-separated list of apt-get packages
        packages: String,

        /// Comma-separated list of PPAs to enable for the install
        #[arg(long)]
        ppas: Option<String>,

        /// Apply PPAs even on non-ubuntu debian-like distros
        #[arg(long)]
        force_ppas_on_non_ubuntu: bool,
    },

    /// Install aptitude packages without growing the layer
    Aptitude {
        /// Comma-separated list of aptitude packages
        packages: String,

        /// Comma-separated list of PPAs to enable for the install
        #[arg(long)]
        ppas: Option<String>,

        /// Apply PPAs even on non-ubuntu debian-like distros
        #[arg(long)]
        force_ppas_on_non_ubuntu: bool,
    },

    /// Install apk packages without growing the layer (alpine)
    Apk {
        /// Comma-separated list of apk packages
        packages: String,
    },

    /// Install binaries from a GitHub release
    GhRelease {
        /// Repository slug (owner/name)
        repo: String,

        /// Comma-separated list of binary names to install
        binary_names: String,

        /// Release tag, or "latest"
        #[arg(long, default_value = "latest")]
        version: String,

        /// Library directory name (defaults to the binary name)
        #[arg(long)]
        lib_name: Option<String>,

        /// Regex that pins the release asset directly
        #[arg(long)]
        asset_regex: Option<String>,

        /// Regex that restricts candidate release tags
        #[arg(long)]
        release_tag_regex: Option<String>,

        /// Where binaries are placed (default /usr/local/bin)
        #[arg(long)]
        bin_location: Option<PathBuf>,

        /// Where library bundles are placed (default /usr/local/lib)
        #[arg(long)]
        lib_location: Option<PathBuf>,

        /// Overwrite existing targets
        #[arg(long)]
        force: bool,

        /// Override the detected architecture for asset selection
        #[arg(long)]
        arch: Option<String>,
    },
}

/// Parse a `key=value` argument, stripping symmetric outer double quotes
fn parse_key_val(arg: &str) -> std::result::Result<(String, String), String> {
    let arg = strip_if_wrapped(arg, '"');
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| "must be formatted as 'key=value'".to_string())?;
    if key.is_empty() {
        return Err("must be formatted as 'key=value'".to_string());
    }
    Ok((key.to_string(), strip_if_wrapped(value, '"').to_string()))
}

/// Strip one leading+trailing `wrapper` pair, if both are present
fn strip_if_wrapped(value: &str, wrapper: char) -> &str {
    if value.len() >= 2 && value.starts_with(wrapper) && value.ends_with(wrapper) {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        if self.release_version {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        match self.command {
            Some(Commands::Install(install_command)) => install::execute(install_command).await,
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}
