// src/sys/device.rs

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CARD_LABEL, DEVICE_INDEX, MODULE_NAME};
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Stage;
use crate::sys::privilege::PrivilegeContext;
use crate::sys::profile::SystemProfile;
use crate::sys::traits::{Host, Invocation, ProvisioningStep, StepReport};

const SETTLE_POLL: Duration = Duration::from_millis(100);

/// `modprobe` parameters pinning index, label and single-producer mode.
pub fn module_parameters() -> [String; 3] {
    [
        format!("video_nr={DEVICE_INDEX}"),
        format!("card_label={CARD_LABEL}"),
        "exclusive_caps=1".to_string(),
    ]
}

pub fn options_line() -> String {
    format!("options {MODULE_NAME} video_nr={DEVICE_INDEX} card_label=\"{CARD_LABEL}\" exclusive_caps=1")
}

/// Persists the module configuration and (re)loads it until the device node shows up.
pub struct DeviceConfigurator {
    host: Arc<dyn Host>,
    privilege: Arc<PrivilegeContext>,
    device_node: PathBuf,
    autoload_file: PathBuf,
    options_file: PathBuf,
    settle: Duration,
}

impl DeviceConfigurator {
    pub fn new(
        host: Arc<dyn Host>,
        privilege: Arc<PrivilegeContext>,
        device_node: PathBuf,
        modules_load_dir: &Path,
        modprobe_dir: &Path,
        settle: Duration,
    ) -> Self {
        let file_name = format!("{MODULE_NAME}.conf");
        Self {
            host,
            privilege,
            device_node,
            autoload_file: modules_load_dir.join(&file_name),
            options_file: modprobe_dir.join(&file_name),
            settle,
        }
    }

    async fn write_if_absent(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        if self.host.exists(path) {
            debug!("{} already present", path.display());
            return Ok(());
        }
        info!("📝 Writing {}", path.display());
        self.privilege.write_file(path, contents).await
    }

    async fn reload_module(&self) -> ProvisionResult<()> {
        let unload = Invocation::new("modprobe").args(["-r", MODULE_NAME]);
        match self.privilege.run(&unload).await {
            Ok(out) if !out.success() => debug!("{} was not loaded: {}", MODULE_NAME, out.failure_detail()),
            Err(e) => debug!("unload of {} skipped: {}", MODULE_NAME, e),
            Ok(_) => {}
        }

        let load = Invocation::new("modprobe")
            .arg(MODULE_NAME)
            .args(module_parameters());
        let out = self.privilege.run(&load).await?;
        if !out.success() {
            warn!("modprobe {} failed: {}", MODULE_NAME, out.failure_detail());
        }
        Ok(())
    }

    async fn wait_for_node(&self) -> bool {
        let attempts = (self.settle.as_millis() / SETTLE_POLL.as_millis()) as usize;
        for attempt in 0..=attempts {
            if self.host.exists(&self.device_node) {
                return true;
            }
            if attempt < attempts {
                self.host.pause(SETTLE_POLL).await;
            }
        }
        false
    }
}

#[async_trait]
impl ProvisioningStep for DeviceConfigurator {
    fn name(&self) -> &'static str {
        "virtual camera device"
    }

    fn stage(&self) -> Stage {
        Stage::ConfiguringDevice
    }

    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        self.host.exists(&self.device_node)
    }

    async fn apply(&self, _profile: &SystemProfile) -> ProvisionResult<StepReport> {
        self.privilege.acquire().await?;
        self.write_if_absent(&self.autoload_file, &format!("{MODULE_NAME}\n")).await?;
        self.write_if_absent(&self.options_file, &format!("{}\n", options_line())).await?;

        self.reload_module().await?;

        if self.wait_for_node().await {
            info!("🎥 {} is ready", self.device_node.display());
            Ok(StepReport::Applied)
        } else {
            Err(ProvisionError::ModuleLoadFailure {
                module: MODULE_NAME.to_string(),
                device: self.device_node.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::profile::{Architecture, PackageManager};
    use crate::sys::testing::{Effect, FakeHost};
    use crate::sys::traits::CommandOutput;

    const AUTOLOAD: &str = "/etc/modules-load.d/v4l2loopback.conf";
    const OPTIONS: &str = "/etc/modprobe.d/v4l2loopback.conf";

    fn profile() -> SystemProfile {
        SystemProfile {
            architecture: Architecture::X86_64,
            distro_id: "ubuntu".into(),
            distro_name: "Ubuntu".into(),
            package_manager: PackageManager::Apt,
            is_special_kernel_variant: false,
        }
    }

    fn configurator(host: &Arc<FakeHost>, settle: Duration) -> DeviceConfigurator {
        DeviceConfigurator::new(
            host.clone(),
            Arc::new(PrivilegeContext::new(host.clone())),
            PathBuf::from("/dev/video10"),
            Path::new("/etc/modules-load.d"),
            Path::new("/etc/modprobe.d"),
            settle,
        )
    }

    fn loads_successfully() -> FakeHost {
        FakeHost::new().on("sudo modprobe v4l2loopback", Effect::CreatePath("/dev/video10".into()))
    }

    #[test]
    fn options_line_is_exact() {
        assert_eq!(
            options_line(),
            r#"options v4l2loopback video_nr=10 card_label="BlurCam" exclusive_caps=1"#
        );
    }

    #[tokio::test]
    async fn existing_node_means_no_writes_and_no_reload() {
        let host = Arc::new(FakeHost::new().path("/dev/video10"));
        let report = configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap();

        assert_eq!(report, StepReport::AlreadySatisfied);
        assert!(host.commands().is_empty());
        assert!(host.file_contents(OPTIONS).is_none());
    }

    #[tokio::test]
    async fn fresh_host_gets_both_files_then_a_reload() {
        let host = Arc::new(loads_successfully());
        let report = configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap();

        assert_eq!(report, StepReport::Applied);
        assert_eq!(host.file_contents(AUTOLOAD).as_deref(), Some("v4l2loopback\n"));
        assert_eq!(
            host.file_contents(OPTIONS).as_deref(),
            Some("options v4l2loopback video_nr=10 card_label=\"BlurCam\" exclusive_caps=1\n")
        );
        assert_eq!(
            host.commands(),
            vec![
                "sudo -v",
                "sudo tee /etc/modules-load.d/v4l2loopback.conf",
                "sudo tee /etc/modprobe.d/v4l2loopback.conf",
                "sudo modprobe -r v4l2loopback",
                "sudo modprobe v4l2loopback video_nr=10 card_label=BlurCam exclusive_caps=1",
            ]
        );
    }

    #[tokio::test]
    async fn existing_config_files_are_not_rewritten() {
        let host = Arc::new(
            loads_successfully()
                .file(AUTOLOAD, "v4l2loopback\n")
                .file(OPTIONS, "options v4l2loopback video_nr=4\n"),
        );
        configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap();

        assert!(!host.ran("sudo tee"));
        assert_eq!(
            host.file_contents(OPTIONS).as_deref(),
            Some("options v4l2loopback video_nr=4\n")
        );
    }

    #[tokio::test]
    async fn failed_unload_is_tolerated() {
        let host = Arc::new(
            loads_successfully()
                .respond("sudo modprobe -r", CommandOutput::failed(1, "modprobe: FATAL: Module v4l2loopback is not in kernel.")),
        );
        let report = configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap();
        assert_eq!(report, StepReport::Applied);
    }

    #[tokio::test]
    async fn missing_node_after_load_is_a_soft_failure() {
        let host = Arc::new(FakeHost::new());
        let step = configurator(&host, Duration::from_millis(300));

        let err = step.ensure(&profile()).await.unwrap_err();

        assert!(matches!(err, ProvisionError::ModuleLoadFailure { .. }));
        assert_eq!(err.severity(), crate::error::Severity::Warn);
        assert_eq!(host.pauses(), 3);
    }

    #[tokio::test]
    async fn refused_sudo_stays_fatal() {
        let host = Arc::new(loads_successfully().respond("sudo -v", CommandOutput::failed(1, "Sorry, try again.")));
        let err = configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap_err();

        assert!(matches!(err, ProvisionError::PrivilegeDenied(_)));
        assert_eq!(err.severity(), crate::error::Severity::Fatal);
        assert!(host.file_contents(OPTIONS).is_none());
    }

    #[tokio::test]
    async fn failed_config_write_stays_fatal() {
        let host = Arc::new(loads_successfully().respond("sudo tee", CommandOutput::failed(1, "tee: Read-only file system")));
        let err = configurator(&host, Duration::ZERO).ensure(&profile()).await.unwrap_err();

        assert!(matches!(err, ProvisionError::Io { .. }));
        assert_eq!(err.severity(), crate::error::Severity::Fatal);
        assert!(!host.ran("sudo modprobe"));
    }
}
