// src/orchestrator.rs

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ProvisionConfig, VIDEO_GROUP};
use crate::error::{ProvisionError, Severity};
use crate::sys::app::ApplicationInstaller;
use crate::sys::device::DeviceConfigurator;
use crate::sys::groups::PermissionManager;
use crate::sys::kmod::KernelModuleInstaller;
use crate::sys::privilege::PrivilegeContext;
use crate::sys::profile::SystemProfiler;
use crate::sys::systemd::{ServiceRegistrar, UserSystemdManager};
use crate::sys::toolchain::ToolchainInstaller;
use crate::sys::traits::{Host, InteractionGate, ProvisioningStep, StepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probing,
    Confirming,
    InstallingToolchain,
    InstallingModule,
    ConfiguringDevice,
    SettingPermissions,
    InstallingApplication,
    RegisteringService,
    Done,
    Aborted,
}

/// What happened during one pass over the pipeline.
#[derive(Debug)]
pub struct RunReport {
    pub stages: Vec<Stage>,
    /// Soft failures that did not stop the run.
    pub warnings: Vec<String>,
    /// Follow-up actions for the operator.
    pub advisories: Vec<String>,
    pub error: Option<ProvisionError>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            stages: Vec::new(),
            warnings: Vec::new(),
            advisories: Vec::new(),
            error: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn abort(mut self, err: ProvisionError) -> Self {
        self.error = Some(err);
        self.enter(Stage::Aborted);
        self
    }

    pub fn final_stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Probing)
    }

    pub fn exit_code(&self) -> u8 {
        if self.final_stage() == Stage::Done { 0 } else { 1 }
    }
}

/// Runs every provisioning step once, in dependency order.
pub struct Orchestrator {
    profiler: SystemProfiler,
    gate: Arc<dyn InteractionGate>,
    steps: Vec<Arc<dyn ProvisioningStep>>,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn Host>, gate: Arc<dyn InteractionGate>, config: &ProvisionConfig) -> Self {
        let privilege = Arc::new(PrivilegeContext::new(host.clone()));
        let toolchain = Arc::new(ToolchainInstaller::new(
            host.clone(),
            gate.clone(),
            config.toolchain_installer_url.clone(),
            config.user_bin_dirs(),
        ));

        let steps: Vec<Arc<dyn ProvisioningStep>> = vec![
            toolchain.clone(),
            Arc::new(KernelModuleInstaller::new(host.clone(), gate.clone(), privilege.clone())),
            Arc::new(DeviceConfigurator::new(
                host.clone(),
                privilege.clone(),
                config.device_node(),
                &config.modules_load_dir,
                &config.modprobe_dir,
                config.device_settle,
            )),
            Arc::new(PermissionManager::new(host.clone(), privilege, VIDEO_GROUP)),
            Arc::new(ApplicationInstaller::new(
                host.clone(),
                toolchain,
                config.app_source.clone(),
                config.user_bin_dirs(),
            )),
            Arc::new(ServiceRegistrar::new(
                host.clone(),
                Box::new(UserSystemdManager::new(host.clone(), config.systemd_user_dir.clone())),
                config.unit_name(),
            )),
        ];

        Self {
            profiler: SystemProfiler::new(host),
            gate,
            steps,
        }
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new();

        report.enter(Stage::Probing);
        let profile = match self.profiler.probe().await {
            Ok(profile) => profile,
            Err(err) => return report.abort(err),
        };
        info!(
            "🐧 {} ({:?}), package manager: {}{}",
            profile.distro_name,
            profile.architecture,
            profile.package_manager,
            if profile.is_special_kernel_variant { ", Asahi kernel" } else { "" }
        );

        report.enter(Stage::Confirming);
        if !self.gate.confirm("Set up the BlurCam virtual camera on this machine?", true).await {
            return report.abort(ProvisionError::UserDeclined {
                component: "BlurCam setup".to_string(),
            });
        }

        for step in &self.steps {
            report.enter(step.stage());
            match step.ensure(&profile).await {
                Ok(StepReport::AlreadySatisfied) => info!("✔ {}: already in place", step.name()),
                Ok(StepReport::Applied) => info!("✔ {}: done", step.name()),
                Ok(StepReport::Advisory(note)) => {
                    warn!("⚠️ {}", note);
                    report.advisories.push(note);
                }
                Err(err) => match err.severity() {
                    Severity::Warn => {
                        warn!("⚠️ {}: {}", step.name(), err);
                        report.warnings.push(err.to_string());
                    }
                    Severity::Fatal => return report.abort(err),
                },
            }
        }

        report.enter(Stage::Done);
        info!("🎉 BlurCam is set up. Select \"BlurCam\" as the camera in your video app.");
        report
    }
}
