// src/sys/profile.rs

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::SPECIAL_KERNEL_MARKER;
use crate::error::{ProvisionError, ProvisionResult};
use crate::sys::traits::Host;

const OS_RELEASE: &str = "/etc/os-release";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
    Unsupported,
}

impl Architecture {
    pub fn from_machine(machine: &str) -> Self {
        match machine {
            "x86_64" | "amd64" => Self::X86_64,
            "aarch64" | "arm64" => Self::Arm64,
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Dnf,
    Apt,
    Pacman,
    Unknown,
}

impl PackageManager {
    /// Detection order; the first one found on the search path wins.
    pub const PRIORITY: [PackageManager; 3] = [Self::Dnf, Self::Apt, Self::Pacman];

    pub fn executable(self) -> Option<&'static str> {
        match self {
            Self::Dnf => Some("dnf"),
            Self::Apt => Some("apt-get"),
            Self::Pacman => Some("pacman"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dnf => "dnf",
            Self::Apt => "apt",
            Self::Pacman => "pacman",
            Self::Unknown => "unknown",
        })
    }
}

/// Facts about the host, gathered once before any step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemProfile {
    pub architecture: Architecture,
    pub distro_id: String,
    pub distro_name: String,
    pub package_manager: PackageManager,
    pub is_special_kernel_variant: bool,
}

/// Extracts `ID` and `NAME` from os-release content.
pub fn parse_os_release(content: &str) -> (String, String) {
    let mut id = "unknown".to_string();
    let mut name = "Unknown".to_string();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim() {
            "ID" => id = value.to_lowercase(),
            "NAME" => name = value.to_string(),
            _ => {}
        }
    }
    (id, name)
}

pub struct SystemProfiler {
    host: Arc<dyn Host>,
}

impl SystemProfiler {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    pub async fn probe(&self) -> ProvisionResult<SystemProfile> {
        if self.host.effective_uid() == 0 {
            return Err(ProvisionError::Environment(
                "do not run as root; administrator rights are requested only for the steps that need them"
                    .into(),
            ));
        }

        let kernel = self.host.kernel()?;
        if kernel.sysname != "Linux" {
            return Err(ProvisionError::Environment(format!(
                "only Linux is supported (found {})",
                kernel.sysname
            )));
        }

        let architecture = Architecture::from_machine(&kernel.machine);
        if architecture == Architecture::Unsupported {
            return Err(ProvisionError::Environment(format!(
                "architecture {} is not supported (x86_64 and arm64 only)",
                kernel.machine
            )));
        }

        let (distro_id, distro_name) = match self.host.read_file(Path::new(OS_RELEASE)).await {
            Some(content) => parse_os_release(&content),
            None => ("unknown".to_string(), "Unknown".to_string()),
        };

        let package_manager = PackageManager::PRIORITY
            .into_iter()
            .find(|pm| pm.executable().is_some_and(|exe| self.host.which(exe).is_some()))
            .unwrap_or(PackageManager::Unknown);

        let is_special_kernel_variant = kernel
            .release
            .to_lowercase()
            .contains(SPECIAL_KERNEL_MARKER);

        let profile = SystemProfile {
            architecture,
            distro_id,
            distro_name,
            package_manager,
            is_special_kernel_variant,
        };
        debug!(?profile, kernel_release = %kernel.release, "system profiled");
        Ok(profile)
    }
}
