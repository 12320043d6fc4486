//! Host facts for provider selection.
//!
//! Providers are confined to hosts by predicates over these facts (OS family,
//! available commands). Facts are gathered once per run; selection itself
//! never touches the system.
//!
//! # Example
//!
//! ```
//! use declarative::facts::{HostFacts, OsFamily};
//!
//! let facts = HostFacts::new("linux", "x86_64", OsFamily::Debian).with_command("apt-get");
//! assert!(facts.has_command("apt-get"));
//! assert!(facts.user_private_groups);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    RedHat,
    Suse,
    Arch,
    Alpine,
    Gentoo,
    /// Linux distribution not otherwise recognised
    Linux,
    FreeBsd,
    Darwin,
    Windows,
    Unknown,
}

impl OsFamily {
    /// All Linux families
    pub const LINUX: &'static [Self] = &[
        Self::Debian,
        Self::RedHat,
        Self::Suse,
        Self::Arch,
        Self::Alpine,
        Self::Gentoo,
        Self::Linux,
    ];

    pub fn is_linux(self) -> bool {
        Self::LINUX.contains(&self)
    }

    /// Whether new users get a group of their own name by default
    ///
    /// SUSE, macOS and Windows put new users into a shared group.
    pub fn uses_private_groups(self) -> bool {
        !matches!(
            self,
            Self::Suse | Self::Darwin | Self::Windows | Self::Unknown
        )
    }

    /// Detect the family from `/etc/os-release` content
    ///
    /// `ID` is checked first, then each entry of `ID_LIKE`.
    pub fn from_os_release(content: &str) -> Self {
        let mut id = None;
        let mut id_like = Vec::new();

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => id = Some(value.to_ascii_lowercase()),
                "ID_LIKE" => {
                    id_like = value
                        .split_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect();
                }
                _ => {}
            }
        }

        id.iter()
            .chain(id_like.iter())
            .find_map(|candidate| Self::from_distro_id(candidate))
            .unwrap_or(Self::Linux)
    }

    fn from_distro_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" | "linuxmint" | "raspbian" => Some(Self::Debian),
            "rhel" | "redhat" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" => {
                Some(Self::RedHat)
            }
            "suse" | "sles" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => {
                Some(Self::Suse)
            }
            "arch" | "manjaro" | "endeavouros" => Some(Self::Arch),
            "alpine" => Some(Self::Alpine),
            "gentoo" => Some(Self::Gentoo),
            _ => None,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debian => "debian",
            Self::RedHat => "redhat",
            Self::Suse => "suse",
            Self::Arch => "arch",
            Self::Alpine => "alpine",
            Self::Gentoo => "gentoo",
            Self::Linux => "linux",
            Self::FreeBsd => "freebsd",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        })
    }
}

/// Facts about the host the catalog is applied to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFacts {
    /// `std::env::consts::OS`
    pub os: String,
    /// `std::env::consts::ARCH`
    pub arch: String,
    pub family: OsFamily,
    /// Commands found in `PATH` among those looked up
    pub commands: BTreeSet<String>,
    /// New users get a private group of the same name
    pub user_private_groups: bool,
}

impl HostFacts {
    pub fn new(os: &str, arch: &str, family: OsFamily) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            family,
            commands: BTreeSet::new(),
            user_private_groups: family.uses_private_groups(),
        }
    }

    /// Detect facts for the running host
    ///
    /// `commands` lists those whose availability matters to the
    /// registered providers; each one is looked up in `PATH`.
    pub fn detect(commands: &[&str]) -> Self {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        let family = match os {
            "linux" => std::fs::read_to_string(Path::new("/etc/os-release"))
                .map(|content| OsFamily::from_os_release(&content))
                .unwrap_or(OsFamily::Linux),
            "macos" => OsFamily::Darwin,
            "freebsd" => OsFamily::FreeBsd,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Unknown,
        };

        let mut facts = Self::new(os, arch, family);
        for command in commands {
            if which::which(command).is_ok() {
                facts.commands.insert((*command).to_string());
            }
        }

        log::debug!(
            "host facts: {} {} ({}), commands: {:?}",
            facts.os,
            facts.arch,
            facts.family,
            facts.commands
        );
        facts
    }

    /// Add an available command
    pub fn with_command(mut self, command: &str) -> Self {
        self.commands.insert(command.to_string());
        self
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_release_id() {
        let content = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(OsFamily::from_os_release(content), OsFamily::Debian);
    }

    #[test]
    fn test_os_release_id_like_fallback() {
        let content = "ID=\"pop\"\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(OsFamily::from_os_release(content), OsFamily::Debian);

        let content = "ID=ol\nID_LIKE=\"fedora\"\n";
        assert_eq!(OsFamily::from_os_release(content), OsFamily::RedHat);
    }

    #[test]
    fn test_os_release_unknown_distro() {
        assert_eq!(OsFamily::from_os_release("ID=nixos\n"), OsFamily::Linux);
        assert_eq!(OsFamily::from_os_release(""), OsFamily::Linux);
    }

    #[test]
    fn test_private_groups_by_family() {
        assert!(HostFacts::new("linux", "x86_64", OsFamily::RedHat).user_private_groups);
        assert!(!HostFacts::new("linux", "x86_64", OsFamily::Suse).user_private_groups);
        assert!(!HostFacts::new("macos", "aarch64", OsFamily::Darwin).user_private_groups);
    }

    #[test]
    fn test_detect_has_valid_os() {
        let facts = HostFacts::detect(&[]);
        assert!(!facts.os.is_empty());
        assert!(!facts.arch.is_empty());
        assert!(facts.commands.is_empty());
    }
}
