// src/sys/packages.rs

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::sys::privilege::PrivilegeContext;
use crate::sys::profile::{PackageManager, SystemProfile};
use crate::sys::traits::{Host, Invocation, PackageBackend};

/// Headers matching the 16k-page Asahi kernel.
const SPECIAL_KERNEL_HEADERS: &str = "kernel-16k-devel";

/// Arch kernel flavours plus Manjaro's numbered kernels (`linux612`, `linux66-rt`).
/// Each has a matching `<name>-headers` package.
static KERNEL_PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^linux(-lts|-zen|-hardened|-rt|-rt-lts|\d+(-rt)?)?$").expect("static regex")
});

/// Selects the strategy for the detected package manager.
pub fn backend_for(
    manager: PackageManager,
    host: Arc<dyn Host>,
    privilege: Arc<PrivilegeContext>,
) -> Option<Box<dyn PackageBackend>> {
    match manager {
        PackageManager::Dnf => Some(Box::new(DnfBackend { host, privilege })),
        PackageManager::Apt => Some(Box::new(AptBackend { privilege })),
        PackageManager::Pacman => Some(Box::new(PacmanBackend { host, privilege })),
        PackageManager::Unknown => None,
    }
}

/// Copy-paste commands for installing the module by hand.
pub fn manual_instructions(profile: &SystemProfile) -> String {
    let fedora = if profile.is_special_kernel_variant {
        format!(
            "# Fedora / Asahi Linux\nsudo dnf install akmod-v4l2loopback {SPECIAL_KERNEL_HEADERS}\nsudo akmods --force"
        )
    } else {
        "# Fedora / RHEL\nsudo dnf install akmod-v4l2loopback".to_string()
    };
    let debian = "# Debian / Ubuntu / Raspberry Pi OS\nsudo apt-get update\nsudo apt-get install v4l2loopback-dkms v4l2loopback-utils";
    let arch = "# Arch Linux / Manjaro\nsudo pacman -S v4l2loopback-dkms";

    let blocks = match profile.package_manager {
        PackageManager::Dnf => vec![fedora],
        PackageManager::Apt => vec![debian.to_string()],
        PackageManager::Pacman => vec![arch.to_string()],
        PackageManager::Unknown => vec![fedora, debian.to_string(), arch.to_string()],
    };
    format!(
        "Detected distribution: {} ({})\n\n{}",
        profile.distro_name,
        profile.distro_id,
        blocks.join("\n\n")
    )
}

/// First installed kernel package in `pacman -Qq` output.
pub fn installed_kernel(package_list: &str) -> Option<String> {
    package_list
        .lines()
        .map(str::trim)
        .find(|name| KERNEL_PACKAGE.is_match(name))
        .map(str::to_string)
}

async fn run_privileged(
    privilege: &PrivilegeContext,
    manager: &str,
    invocation: Invocation,
) -> ProvisionResult<()> {
    info!("📦 {}", invocation);
    let out = privilege.run(&invocation).await?;
    if !out.success() {
        return Err(ProvisionError::PackageManagerFailure {
            manager: manager.to_string(),
            command: format!("sudo {invocation}"),
            detail: out.failure_detail(),
        });
    }
    Ok(())
}

// ==============================================================================
// 1. dnf (Fedora family, including Asahi)
// ==============================================================================

pub struct DnfBackend {
    host: Arc<dyn Host>,
    privilege: Arc<PrivilegeContext>,
}

impl DnfBackend {
    async fn headers_installed(&self) -> bool {
        let query = Invocation::new("rpm").args(["-q", SPECIAL_KERNEL_HEADERS]);
        matches!(self.host.run(&query).await, Ok(out) if out.success())
    }
}

#[async_trait]
impl PackageBackend for DnfBackend {
    fn name(&self) -> &'static str {
        "dnf"
    }

    fn module_packages(&self) -> &'static [&'static str] {
        &["akmod-v4l2loopback"]
    }

    async fn install_packages(&self, packages: &[&str]) -> ProvisionResult<()> {
        let inv = Invocation::new("dnf").args(["install", "-y"]).args(packages.iter().copied());
        run_privileged(&self.privilege, self.name(), inv).await
    }

    async fn install_kernel_module(&self, profile: &SystemProfile) -> ProvisionResult<()> {
        self.install_packages(self.module_packages()).await?;

        if profile.is_special_kernel_variant {
            if self.headers_installed().await {
                info!("{} already installed", SPECIAL_KERNEL_HEADERS);
            } else {
                self.install_packages(&[SPECIAL_KERNEL_HEADERS]).await?;
            }
            run_privileged(
                &self.privilege,
                self.name(),
                Invocation::new("akmods").arg("--force"),
            )
            .await?;
        }
        Ok(())
    }
}

// ==============================================================================
// 2. apt (Debian family)
// ==============================================================================

pub struct AptBackend {
    privilege: Arc<PrivilegeContext>,
}

#[async_trait]
impl PackageBackend for AptBackend {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn module_packages(&self) -> &'static [&'static str] {
        &["v4l2loopback-dkms", "v4l2loopback-utils"]
    }

    async fn refresh_index(&self) -> ProvisionResult<()> {
        run_privileged(&self.privilege, self.name(), Invocation::new("apt-get").arg("update")).await
    }

    async fn install_packages(&self, packages: &[&str]) -> ProvisionResult<()> {
        let inv = Invocation::new("apt-get")
            .args(["install", "-y"])
            .args(packages.iter().copied());
        run_privileged(&self.privilege, self.name(), inv).await
    }
}

// ==============================================================================
// 3. pacman (Arch family)
// ==============================================================================

pub struct PacmanBackend {
    host: Arc<dyn Host>,
    privilege: Arc<PrivilegeContext>,
}

#[async_trait]
impl PackageBackend for PacmanBackend {
    fn name(&self) -> &'static str {
        "pacman"
    }

    fn module_packages(&self) -> &'static [&'static str] {
        &["v4l2loopback-dkms"]
    }

    async fn install_packages(&self, packages: &[&str]) -> ProvisionResult<()> {
        let inv = Invocation::new("pacman")
            .args(["-S", "--needed", "--noconfirm"])
            .args(packages.iter().copied());
        run_privileged(&self.privilege, self.name(), inv).await
    }

    async fn install_kernel_module(&self, _profile: &SystemProfile) -> ProvisionResult<()> {
        let listing = self.host.run(&Invocation::new("pacman").arg("-Qq")).await?;
        match installed_kernel(&listing.stdout) {
            Some(kernel) => {
                let headers = format!("{kernel}-headers");
                self.install_packages(&[headers.as_str()]).await?;
            }
            None => warn!("Could not identify the installed kernel package; skipping headers"),
        }
        self.install_packages(self.module_packages()).await
    }
}
