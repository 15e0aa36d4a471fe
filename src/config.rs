// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ProvisionError, ProvisionResult};

pub const MODULE_NAME: &str = "v4l2loopback";
pub const DEVICE_INDEX: u32 = 10;
pub const CARD_LABEL: &str = "BlurCam";
pub const VIDEO_GROUP: &str = "video";
pub const APP_NAME: &str = "blurcam";
pub const TOOLCHAIN: &str = "uv";
pub const SPECIAL_KERNEL_MARKER: &str = "asahi";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    // 📦 Sources
    pub app_source: String,
    pub toolchain_installer_url: String,

    // 📂 Platform paths
    pub home_dir: PathBuf,
    pub modules_load_dir: PathBuf,
    pub modprobe_dir: PathBuf,
    pub systemd_user_dir: PathBuf,

    pub device_settle: Duration,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl ProvisionConfig {
    pub fn load() -> ProvisionResult<Self> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| ProvisionError::Config("cannot determine home directory".into()))?;
        let config_dir = dirs::config_dir().unwrap_or_else(|| home_dir.join(".config"));

        let settle_ms = match env::var("BLURCAM_DEVICE_SETTLE_MS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                ProvisionError::Config(format!("BLURCAM_DEVICE_SETTLE_MS must be milliseconds, got '{raw}'"))
            })?,
            Err(_) => 2000,
        };

        let log_format = match env::var("BLURCAM_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(ProvisionError::Config(format!(
                    "BLURCAM_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )));
            }
        };

        Ok(Self {
            app_source: env::var("BLURCAM_SOURCE")
                .unwrap_or_else(|_| "git+https://github.com/blurcam/blurcam".to_string()),
            toolchain_installer_url: env::var("BLURCAM_TOOLCHAIN_INSTALLER")
                .unwrap_or_else(|_| "https://astral.sh/uv/install.sh".to_string()),
            modules_load_dir: path_var("BLURCAM_MODULES_LOAD_DIR", "/etc/modules-load.d"),
            modprobe_dir: path_var("BLURCAM_MODPROBE_DIR", "/etc/modprobe.d"),
            systemd_user_dir: env::var_os("BLURCAM_SYSTEMD_USER_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| config_dir.join("systemd").join("user")),
            home_dir,
            device_settle: Duration::from_millis(settle_ms),
            log_filter: env::var("BLURCAM_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format,
        })
    }

    /// Directories where user-local installers drop executables.
    pub fn user_bin_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.home_dir.join(".local").join("bin"),
            self.home_dir.join(".cargo").join("bin"),
        ]
    }

    pub fn device_node(&self) -> PathBuf {
        PathBuf::from(format!("/dev/video{DEVICE_INDEX}"))
    }

    pub fn unit_name(&self) -> String {
        format!("{APP_NAME}.service")
    }

    /// Fixed-path defaults rooted at `home`, used by tests.
    #[cfg(test)]
    pub fn for_home(home: &std::path::Path) -> Self {
        Self {
            app_source: "git+https://example.invalid/blurcam".into(),
            toolchain_installer_url: "https://example.invalid/uv/install.sh".into(),
            home_dir: home.to_path_buf(),
            modules_load_dir: PathBuf::from("/etc/modules-load.d"),
            modprobe_dir: PathBuf::from("/etc/modprobe.d"),
            systemd_user_dir: home.join(".config/systemd/user"),
            device_settle: Duration::ZERO,
            log_filter: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

fn path_var(key: &str, default: &str) -> PathBuf {
    env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
