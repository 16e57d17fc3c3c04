//! Devcontainer feature installation
//!
//! Pulls a feature bundle from an OCI registry, computes the effective
//! option/environment set, runs its `install.sh` as root under a controlled
//! shell, and persists the feature's `containerEnv` into `/etc/profile.d`.

use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::errors::{FeatureError, HostError, Result};
use crate::features::{
    parse_feature_metadata, FeatureMetadata, OptionValue, DEVCONTAINER_JSON_FILENAME,
};
use crate::invoker::{self, InvokeOptions};
use crate::oci::{OciRef, OciRegistry};
use crate::settings::{
    Settings, ENV_CLI_LOCATION, ENV_FORCE_CLI_INSTALLATION, ENV_PROPAGATE_CLI_LOCATION,
    ENV_VERBOSE,
};

/// Users probed, in order, when no remote user is requested
const ORDERED_BASE_REMOTE_USERS: [&str; 3] = ["vscode", "node", "codespace"];
/// Mostly the base user of the container image ("ubuntu" and friends)
const FALLBACK_USER_ID_A: u32 = 1000;
const FALLBACK_USER_ID_B: u32 = 0;

const REMOTE_USER_ENV: &str = "_REMOTE_USER";
const REMOTE_USER_HOME_ENV: &str = "_REMOTE_USER_HOME";
const FEATURE_ENTRYPOINT: &str = "install.sh";

/// Where feature container envs are persisted
pub const PROFILE_DIR: &str = "/etc/profile.d";

/// A user entry resolved from /etc/passwd
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdUser {
    pub name: String,
    pub uid: u32,
    pub home: String,
}

/// Installs devcontainer features from OCI registries
pub struct FeatureInstaller {
    registry: OciRegistry,
    profile_dir: PathBuf,
}

impl FeatureInstaller {
    pub fn new() -> Result<Self> {
        Ok(Self {
            registry: OciRegistry::new()?,
            profile_dir: PathBuf::from(PROFILE_DIR),
        })
    }

    /// Installer with a custom registry transport and profile directory
    /// (local test registries)
    pub fn with_registry(registry: OciRegistry, profile_dir: PathBuf) -> Self {
        Self {
            registry,
            profile_dir,
        }
    }

    /// Run the full feature install flow
    #[instrument(level = "info", skip(self, options, envs))]
    pub async fn install(
        &self,
        feature_ref: &str,
        options: IndexMap<String, String>,
        envs: IndexMap<String, String>,
        remote_user: Option<&str>,
        verbose: bool,
    ) -> Result<()> {
        if !crate::host::has_root_privileges() {
            return Err(HostError::PermissionDenied {
                message: "Installer must be run as root. Use sudo, su, or add 'USER root' to \
                          your Dockerfile before running this command."
                    .to_string(),
            }
            .into());
        }

        let oci_ref = OciRef::parse(feature_ref)?;

        // feature artifacts carry their whole bundle in one layer
        let manifest = self.registry.get_manifest(&oci_ref).await?;
        if manifest.layers.len() != 1 {
            return Err(FeatureError::Validation {
                message: format!(
                    "feature oci should have 1 layer only (got {})",
                    manifest.layers.len()
                ),
            }
            .into());
        }

        let metadata = self.fetch_metadata(&oci_ref).await?;

        let resolved_options = resolve_options(&metadata, options);
        info!("resolved options: {:?}", resolved_options);

        let user = resolve_remote_user(remote_user, &read_passwd()?);
        info!("resolved remote user: {}", user.name);

        let settings = Settings::from_env();
        let verbose = verbose || settings.verbose == "1";
        let envs = assemble_envs(envs, &resolved_options, &user, &settings);

        let execution_dir = tempfile::tempdir()?;
        let bundle_dir = execution_dir.path().join("feature");
        self.registry
            .download_and_extract_layer(&oci_ref, 0, &bundle_dir)
            .await?;

        let command = build_install_command(&bundle_dir, &envs, verbose);
        invoker::invoke(&command, &InvokeOptions::default())?;

        persist_container_env(&self.profile_dir, &metadata)?;
        Ok(())
    }

    /// Fetch and parse the feature's metadata from its bundle
    async fn fetch_metadata(&self, oci_ref: &OciRef) -> Result<FeatureMetadata> {
        let extraction_dir = tempfile::tempdir()?;
        let bundle_dir = extraction_dir.path().join("feature");
        self.registry
            .download_and_extract_layer(oci_ref, 0, &bundle_dir)
            .await?;
        parse_feature_metadata(&bundle_dir.join(DEVCONTAINER_JSON_FILENAME))
    }
}

/// Fill declared defaults for options the user left unset or empty
fn resolve_options(
    metadata: &FeatureMetadata,
    user_options: IndexMap<String, String>,
) -> IndexMap<String, OptionValue> {
    let mut resolved: IndexMap<String, OptionValue> = user_options
        .into_iter()
        .map(|(name, value)| (name, OptionValue::String(value)))
        .collect();

    for (name, definition) in &metadata.options {
        let needs_default = match resolved.get(name) {
            None => true,
            Some(OptionValue::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if needs_default {
            resolved.insert(name.clone(), definition.default.clone());
        }
    }
    resolved
}

/// Parse one /etc/passwd line (`name:x:uid:gid:gecos:home:shell`)
fn parse_passwd_line(line: &str) -> Option<PasswdUser> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() >= 7 {
        Some(PasswdUser {
            name: parts[0].to_string(),
            uid: parts[2].parse().ok()?,
            home: parts[5].to_string(),
        })
    } else {
        None
    }
}

fn parse_passwd(content: &str) -> Vec<PasswdUser> {
    content.lines().filter_map(parse_passwd_line).collect()
}

fn read_passwd() -> Result<Vec<PasswdUser>> {
    Ok(parse_passwd(&fs::read_to_string("/etc/passwd")?))
}

/// Resolve the user feature scripts should treat as the remote user
///
/// Probing order: the explicit name, then `vscode`/`node`/`codespace`,
/// then uid 1000, uid 0, and finally the current process uid.
fn resolve_remote_user(requested: Option<&str>, passwd: &[PasswdUser]) -> PasswdUser {
    let by_name = |name: &str| passwd.iter().find(|u| u.name == name).cloned();
    let by_uid = |uid: u32| passwd.iter().find(|u| u.uid == uid).cloned();

    if let Some(name) = requested {
        if let Some(user) = by_name(name) {
            return user;
        }
        warn!(
            "The user name '{}' was not found, attempting fallback",
            name
        );
    }

    for name in ORDERED_BASE_REMOTE_USERS {
        if let Some(user) = by_name(name) {
            return user;
        }
    }

    by_uid(FALLBACK_USER_ID_A)
        .or_else(|| by_uid(FALLBACK_USER_ID_B))
        .or_else(|| crate::host::effective_uid().and_then(by_uid))
        .unwrap_or(PasswdUser {
            name: "root".to_string(),
            uid: 0,
            home: "/root".to_string(),
        })
}

/// Build the environment handed to install.sh
fn assemble_envs(
    mut envs: IndexMap<String, String>,
    options: &IndexMap<String, OptionValue>,
    user: &PasswdUser,
    settings: &Settings,
) -> IndexMap<String, String> {
    envs.insert(REMOTE_USER_ENV.to_string(), user.name.clone());
    envs.insert(REMOTE_USER_HOME_ENV.to_string(), user.home.clone());

    for (name, value) in options {
        envs.insert(name.to_uppercase(), value.as_env_value());
    }

    envs.insert(ENV_VERBOSE.to_string(), settings.verbose.clone());
    envs.insert(
        ENV_FORCE_CLI_INSTALLATION.to_string(),
        settings.force_cli_installation.clone(),
    );
    envs.insert(
        ENV_PROPAGATE_CLI_LOCATION.to_string(),
        settings.propagate_cli_location.clone(),
    );

    if settings.propagate_cli_location == "1" {
        if !settings.cli_location.is_empty() {
            envs.insert(ENV_CLI_LOCATION.to_string(), settings.cli_location.clone());
        } else if let Ok(exe) = std::env::current_exe() {
            envs.insert(ENV_CLI_LOCATION.to_string(), exe.display().to_string());
        }
    } else {
        // override with an empty value in case the variable already exists
        envs.insert(ENV_CLI_LOCATION.to_string(), String::new());
    }

    envs
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "\\\"")
}

/// Build the install.sh invocation
///
/// `-i` loads rc files so user-level PATH additions are visible; `+H`
/// disables history expansion so `!` in option values stays literal.
fn build_install_command(dir: &Path, envs: &IndexMap<String, String>, verbose: bool) -> String {
    let env_variables_cmd = envs
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_quotes(value)))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "cd {} && chmod -R +x . && {} bash -i +H {}./{}",
        dir.display(),
        env_variables_cmd,
        if verbose { "-x " } else { "" },
        FEATURE_ENTRYPOINT
    )
}

/// Persist the feature's containerEnv as profile.d exports, idempotently
fn persist_container_env(profile_dir: &Path, feature: &FeatureMetadata) -> Result<()> {
    fs::create_dir_all(profile_dir)?;
    let profile_file = profile_dir.join(format!("nanolayer-{}.sh", feature.id));

    let mut content = if profile_file.exists() {
        fs::read_to_string(&profile_file)?
    } else {
        String::new()
    };

    let mut modified = !profile_file.exists();
    for (name, value) in &feature.container_env {
        let statement = format!("export {}={}", name, value);
        if !content.contains(&statement) {
            content.push('\n');
            content.push_str(&statement);
            modified = true;
        }
    }

    if modified {
        fs::write(&profile_file, content)?;
    }
    Ok(())
}
