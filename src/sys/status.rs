// src/sys/status.rs

use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{APP_NAME, CARD_LABEL, MODULE_NAME, ProvisionConfig, TOOLCHAIN, VIDEO_GROUP};
use crate::sys::device::{module_parameters, options_line};
use crate::sys::groups::PermissionManager;
use crate::sys::kmod::KernelModuleInstaller;
use crate::sys::packages::manual_instructions;
use crate::sys::profile::SystemProfiler;
use crate::sys::traits::Host;

const MAX_VIDEO_NODES: u32 = 20;
const SYSFS_VIDEO: &str = "/sys/devices/virtual/video4linux";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualDevice {
    pub path: PathBuf,
    pub name: String,
}

/// Read-only snapshot of everything the provisioning run sets up.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub distribution: Option<String>,
    pub special_kernel: bool,
    pub module_installed: bool,
    pub module_loaded: bool,
    pub device: Option<VirtualDevice>,
    pub toolchain: Option<PathBuf>,
    pub entry_point: Option<PathBuf>,
    pub in_video_group: bool,
    pub unit_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_instructions: Option<String>,
}

impl StatusReport {
    pub fn is_healthy(&self) -> bool {
        self.module_installed && self.module_loaded && self.device.is_some()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Distribution: {}", self.distribution.as_deref().unwrap_or("unknown"));
        if self.special_kernel {
            let _ = writeln!(out, "              (Asahi kernel detected)");
        }
        out.push('\n');

        line(&mut out, "Module installed", self.module_installed, None);
        line(&mut out, "Module loaded", self.module_loaded, None);
        let device = self
            .device
            .as_ref()
            .map(|d| format!("{} \"{}\"", d.path.display(), d.name));
        line(&mut out, "Virtual camera device", self.device.is_some(), device.as_deref());
        line(&mut out, "uv", self.toolchain.is_some(), path_detail(&self.toolchain).as_deref());
        line(&mut out, APP_NAME, self.entry_point.is_some(), path_detail(&self.entry_point).as_deref());
        line(&mut out, "In 'video' group", self.in_video_group, None);
        line(&mut out, "User service", self.unit_file.is_some(), path_detail(&self.unit_file).as_deref());
        out.push('\n');

        if let Some(instructions) = &self.install_instructions {
            let _ = writeln!(out, "{MODULE_NAME} is not installed. Install it with:\n\n{instructions}\n");
        } else if !self.module_loaded {
            let _ = writeln!(
                out,
                "{MODULE_NAME} is installed but not loaded. Load it with:\n\n  sudo modprobe {MODULE_NAME} {}\n",
                module_parameters().join(" ")
            );
            let _ = writeln!(out, "To load it at boot, put this in /etc/modprobe.d/{MODULE_NAME}.conf:\n\n  {}\n", options_line());
        } else if self.device.is_none() {
            let _ = writeln!(
                out,
                "{MODULE_NAME} is loaded but no virtual camera was found. Reload it with:\n\n  sudo modprobe -r {MODULE_NAME}\n  sudo modprobe {MODULE_NAME} {}\n",
                module_parameters().join(" ")
            );
        }
        out
    }
}

fn line(out: &mut String, label: &str, ok: bool, detail: Option<&str>) {
    let mark = if ok { "✓" } else { "✗" };
    match detail {
        Some(detail) => {
            let _ = writeln!(out, "  {mark} {label} ({detail})");
        }
        None => {
            let _ = writeln!(out, "  {mark} {label}");
        }
    }
}

fn path_detail(path: &Option<PathBuf>) -> Option<String> {
    path.as_ref().map(|p| p.display().to_string())
}

fn looks_virtual(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("loopback") || name.contains("virtual") || name.contains(&CARD_LABEL.to_lowercase())
}

/// First `/dev/videoN` whose sysfs name identifies a loopback device.
pub async fn find_virtual_device(host: &dyn Host) -> Option<VirtualDevice> {
    for index in 0..MAX_VIDEO_NODES {
        let node = PathBuf::from(format!("/dev/video{index}"));
        if !host.exists(&node) {
            continue;
        }
        let name_file = Path::new(SYSFS_VIDEO).join(format!("video{index}")).join("name");
        if let Some(name) = host.read_file(&name_file).await {
            let name = name.trim();
            if looks_virtual(name) {
                return Some(VirtualDevice {
                    path: node,
                    name: name.to_string(),
                });
            }
        }
    }
    None
}

pub async fn collect(host: Arc<dyn Host>, config: &ProvisionConfig) -> StatusReport {
    host.extend_search_path(&config.user_bin_dirs());

    let profile = SystemProfiler::new(host.clone()).probe().await.ok();
    let module_installed = KernelModuleInstaller::module_known(host.as_ref()).await;
    let unit_path = config.systemd_user_dir.join(config.unit_name());

    StatusReport {
        distribution: profile.as_ref().map(|p| p.distro_name.clone()),
        special_kernel: profile.as_ref().is_some_and(|p| p.is_special_kernel_variant),
        module_installed,
        module_loaded: host.exists(&Path::new("/sys/module").join(MODULE_NAME)),
        device: find_virtual_device(host.as_ref()).await,
        toolchain: host.which(TOOLCHAIN),
        entry_point: host.which(APP_NAME),
        in_video_group: PermissionManager::is_member(host.as_ref(), VIDEO_GROUP).await,
        unit_file: host.exists(&unit_path).then_some(unit_path),
        install_instructions: match (&profile, module_installed) {
            (Some(profile), false) => Some(manual_instructions(profile)),
            _ => None,
        },
    }
}
