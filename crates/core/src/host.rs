//! Host environment probing
//!
//! Reports the machine architecture, bitness, Linux distribution identity
//! and root privileges. All facts are read on demand; the privilege probe
//! is cached for the lifetime of the process.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::process::Command;
use std::str::FromStr;
use tracing::debug;

use crate::errors::{HostError, Result};

/// Location of the distro identity file
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Machine architectures distinguished by asset naming conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86_64,
    Arm64,
    Armv5,
    Armv6,
    Armv7,
    Armhf,
    Arm32,
    I386,
    I686,
    Ppc64,
    S390,
    Other,
}

impl Architecture {
    /// Detect the architecture of the running machine
    pub fn detect() -> Self {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Normalize a machine string (uname-style or Rust target arch)
    pub fn from_machine(machine: &str) -> Self {
        let machine = machine.to_lowercase();
        if machine.contains("x86_64") || machine.contains("amd64") {
            Architecture::X86_64
        } else if machine.contains("arm64") || machine.contains("aarch64") {
            Architecture::Arm64
        } else if machine.contains("armv5") {
            Architecture::Armv5
        } else if machine.contains("armv6") {
            Architecture::Armv6
        } else if machine.contains("armv7") {
            Architecture::Armv7
        } else if machine.contains("armhf") {
            Architecture::Armhf
        } else if machine.contains("i386") {
            Architecture::I386
        } else if machine.contains("i686") || machine == "x86" {
            Architecture::I686
        } else if machine.contains("ppc") || machine.contains("powerpc") {
            Architecture::Ppc64
        } else if machine.contains("arm32") {
            Architecture::Arm32
        } else if machine.contains("s390") {
            Architecture::S390
        } else {
            Architecture::Other
        }
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
            Architecture::Armv5 => "armv5",
            Architecture::Armv6 => "armv6",
            Architecture::Armv7 => "armv7",
            Architecture::Armhf => "armhf",
            Architecture::Arm32 => "arm32",
            Architecture::I386 => "i386",
            Architecture::I686 => "i686",
            Architecture::Ppc64 => "ppc64",
            Architecture::S390 => "s390",
            Architecture::Other => "other",
        }
    }

    /// Word size implied by this architecture
    pub fn bitness(&self) -> Bitness {
        match self {
            Architecture::X86_64
            | Architecture::Arm64
            | Architecture::Ppc64
            | Architecture::S390 => Bitness::B64Bit,
            _ => Bitness::B32Bit,
        }
    }
}

impl FromStr for Architecture {
    type Err = HostError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match Self::from_machine(s) {
            Architecture::Other => Err(HostError::Unsupported {
                message: format!("unrecognized architecture: {}", s),
            }),
            arch => Ok(arch),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer width buckets used in asset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    B32Bit,
    B64Bit,
}

impl Bitness {
    /// Canonical name as seen in release asset names
    pub fn as_str(&self) -> &'static str {
        match self {
            Bitness::B32Bit => "32bit",
            Bitness::B64Bit => "64bit",
        }
    }
}

/// Linux distribution identities recognized for asset selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinuxReleaseId {
    Ubuntu,
    Debian,
    Alpine,
    Rhel,
    Fedora,
    Opensuse,
    Raspbian,
    Manjaro,
    Arch,
    Other,
}

impl LinuxReleaseId {
    /// All identities that carry an asset-name regex
    pub const ALL: [LinuxReleaseId; 9] = [
        LinuxReleaseId::Ubuntu,
        LinuxReleaseId::Debian,
        LinuxReleaseId::Alpine,
        LinuxReleaseId::Rhel,
        LinuxReleaseId::Fedora,
        LinuxReleaseId::Opensuse,
        LinuxReleaseId::Raspbian,
        LinuxReleaseId::Manjaro,
        LinuxReleaseId::Arch,
    ];

    /// Canonical lowercase name (matches /etc/os-release ID values)
    pub fn as_str(&self) -> &'static str {
        match self {
            LinuxReleaseId::Ubuntu => "ubuntu",
            LinuxReleaseId::Debian => "debian",
            LinuxReleaseId::Alpine => "alpine",
            LinuxReleaseId::Rhel => "rhel",
            LinuxReleaseId::Fedora => "fedora",
            LinuxReleaseId::Opensuse => "opensuse",
            LinuxReleaseId::Raspbian => "raspbian",
            LinuxReleaseId::Manjaro => "manjaro",
            LinuxReleaseId::Arch => "arch",
            LinuxReleaseId::Other => "other",
        }
    }

    /// Classify an ID or ID_LIKE value by substring
    pub fn from_os_release_value(value: &str) -> Self {
        let value = value.to_lowercase();
        if value.contains("ubuntu") {
            LinuxReleaseId::Ubuntu
        } else if value.contains("raspbian") {
            LinuxReleaseId::Raspbian
        } else if value.contains("debian") {
            LinuxReleaseId::Debian
        } else if value.contains("alpine") {
            LinuxReleaseId::Alpine
        } else if value.contains("fedora") {
            LinuxReleaseId::Fedora
        } else if value.contains("opensuse") {
            LinuxReleaseId::Opensuse
        } else if value.contains("rhel") {
            LinuxReleaseId::Rhel
        } else if value.contains("manjaro") {
            LinuxReleaseId::Manjaro
        } else if value.contains("arch") {
            LinuxReleaseId::Arch
        } else {
            LinuxReleaseId::Other
        }
    }
}

impl fmt::Display for LinuxReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a KEY=VALUE file such as /etc/os-release
///
/// Comment lines are skipped; surrounding double quotes on values are
/// stripped.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim_matches('"');
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}

fn os_release_value(id_like: bool) -> Result<String> {
    let content = fs::read_to_string(OS_RELEASE_PATH).map_err(|e| HostError::Unsupported {
        message: format!("could not read {}: {}", OS_RELEASE_PATH, e),
    })?;
    let parsed = parse_env_file(&content);

    let value = if id_like {
        // ID_LIKE is optional; the distro's own ID is the fallback
        parsed.get("ID_LIKE").or_else(|| parsed.get("ID"))
    } else {
        parsed.get("ID")
    };

    value.cloned().ok_or_else(|| {
        HostError::Unsupported {
            message: format!("{} has no ID field", OS_RELEASE_PATH),
        }
        .into()
    })
}

/// The distro's own identity (/etc/os-release ID)
pub fn release_id() -> Result<LinuxReleaseId> {
    Ok(LinuxReleaseId::from_os_release_value(&os_release_value(
        false,
    )?))
}

/// The distro family (/etc/os-release ID_LIKE, falling back to ID)
pub fn release_id_like() -> Result<LinuxReleaseId> {
    Ok(LinuxReleaseId::from_os_release_value(&os_release_value(
        true,
    )?))
}

// The workspace forbids unsafe code, so the effective uid comes from the
// `id` command rather than a libc call; it cannot change mid-process.
static EFFECTIVE_UID: Lazy<Option<u32>> = Lazy::new(|| {
    let euid = Command::new("id")
        .arg("-u")
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<u32>()
                .ok()
        });

    debug!("effective uid probe: {:?}", euid);
    euid
});

/// Whether the process runs with root privileges (sudo or uid 0)
pub fn has_root_privileges() -> bool {
    std::env::var("SUDO_UID").is_ok() || *EFFECTIVE_UID == Some(0)
}

/// The process's effective uid, when it could be probed
pub fn effective_uid() -> Option<u32> {
    *EFFECTIVE_UID
}
