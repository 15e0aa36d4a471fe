// src/sys/kmod.rs

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::MODULE_NAME;
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Stage;
use crate::sys::packages::{backend_for, manual_instructions};
use crate::sys::privilege::PrivilegeContext;
use crate::sys::profile::SystemProfile;
use crate::sys::traits::{Host, InteractionGate, Invocation, ProvisioningStep, StepReport};

pub struct KernelModuleInstaller {
    host: Arc<dyn Host>,
    gate: Arc<dyn InteractionGate>,
    privilege: Arc<PrivilegeContext>,
}

impl KernelModuleInstaller {
    pub fn new(
        host: Arc<dyn Host>,
        gate: Arc<dyn InteractionGate>,
        privilege: Arc<PrivilegeContext>,
    ) -> Self {
        Self {
            host,
            gate,
            privilege,
        }
    }

    /// Whether the module registry knows the module, loaded or not.
    pub async fn module_known(host: &dyn Host) -> bool {
        let query = Invocation::new("modinfo").arg(MODULE_NAME);
        matches!(host.run(&query).await, Ok(out) if out.success())
    }
}

#[async_trait]
impl ProvisioningStep for KernelModuleInstaller {
    fn name(&self) -> &'static str {
        "kernel module"
    }

    fn stage(&self) -> Stage {
        Stage::InstallingModule
    }

    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        Self::module_known(self.host.as_ref()).await
    }

    async fn apply(&self, profile: &SystemProfile) -> ProvisionResult<StepReport> {
        let prompt = format!("The {MODULE_NAME} kernel module is not installed. Install it now?");
        if !self.gate.confirm(&prompt, true).await {
            return Err(ProvisionError::UserDeclined {
                component: format!("The {MODULE_NAME} kernel module"),
            });
        }

        let backend = backend_for(
            profile.package_manager,
            self.host.clone(),
            self.privilege.clone(),
        )
        .ok_or_else(|| ProvisionError::UnknownPackageManager {
            instructions: manual_instructions(profile),
        })?;

        info!("Installing {} with {}", MODULE_NAME, backend.name());
        backend.install_kernel_module(profile).await?;
        Ok(StepReport::Applied)
    }
}
