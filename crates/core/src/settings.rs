//! Process settings sourced from the environment
//!
//! All configuration comes from `NANOLAYER_`-prefixed environment variables,
//! read once at invocation start. Feature install scripts receive the same
//! variables back so nested invocations behave consistently.

use std::env;

/// Common prefix for every nanolayer environment variable
pub const ENV_PREFIX: &str = "NANOLAYER_";

/// Path to the running CLI, handed to feature scripts for reuse
pub const ENV_CLI_LOCATION: &str = "NANOLAYER_CLI_LOCATION";
/// "1" enables handing [`ENV_CLI_LOCATION`] to feature scripts
pub const ENV_PROPAGATE_CLI_LOCATION: &str = "NANOLAYER_PROPAGATE_CLI_LOCATION";
/// If set, feature scripts should self-install the CLI even when present
pub const ENV_FORCE_CLI_INSTALLATION: &str = "NANOLAYER_FORCE_CLI_INSTALLATION";
/// "1" enables `-x` tracing in feature install scripts
pub const ENV_VERBOSE: &str = "NANOLAYER_VERBOSE";
/// Analytics opt-out toggle (read but otherwise unused by the core)
pub const ENV_ENABLE_ANALYTICS: &str = "NANOLAYER_ENABLE_ANALYTICS";

/// Configuration record built from the process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Path to the CLI binary for feature scripts to reuse
    pub cli_location: String,
    /// Whether to propagate the CLI location to child feature scripts ("1" = yes)
    pub propagate_cli_location: String,
    /// Whether feature scripts should force a CLI self-install
    pub force_cli_installation: String,
    /// Whether feature scripts run with shell tracing ("1" = yes)
    pub verbose: String,
    /// Analytics opt-out flag
    pub enable_analytics: bool,
}

impl Settings {
    /// Read the settings from the current process environment
    pub fn from_env() -> Self {
        Self {
            cli_location: env::var(ENV_CLI_LOCATION).unwrap_or_default(),
            propagate_cli_location: env::var(ENV_PROPAGATE_CLI_LOCATION)
                .unwrap_or_else(|_| "1".to_string()),
            force_cli_installation: env::var(ENV_FORCE_CLI_INSTALLATION).unwrap_or_default(),
            verbose: env::var(ENV_VERBOSE).unwrap_or_default(),
            enable_analytics: env::var(ENV_ENABLE_ANALYTICS)
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cli_location: String::new(),
            propagate_cli_location: "1".to_string(),
            force_cli_installation: String::new(),
            verbose: String::new(),
            enable_analytics: true,
        }
    }
}
