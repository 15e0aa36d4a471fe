// src/sys/toolchain.rs

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TOOLCHAIN;
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Stage;
use crate::sys::profile::SystemProfile;
use crate::sys::traits::{
    CommandOutput, Host, InteractionGate, Invocation, ProvisioningStep, StepReport,
};

/// Keeps the user-level packaging tool (`uv`) available.
pub struct ToolchainInstaller {
    host: Arc<dyn Host>,
    gate: Arc<dyn InteractionGate>,
    installer_url: String,
    user_bin_dirs: Vec<PathBuf>,
}

impl ToolchainInstaller {
    pub fn new(
        host: Arc<dyn Host>,
        gate: Arc<dyn InteractionGate>,
        installer_url: String,
        user_bin_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            host,
            gate,
            installer_url,
            user_bin_dirs,
        }
    }

    /// Looks for the tool after adding the user-local install directories.
    pub fn resolve(&self) -> Option<PathBuf> {
        self.host.extend_search_path(&self.user_bin_dirs);
        self.host.which(TOOLCHAIN)
    }

    pub fn install_command(&self, source: &str, force: bool) -> Invocation {
        let mut inv = Invocation::new(TOOLCHAIN).args(["tool", "install"]);
        if force {
            inv = inv.arg("--force");
        }
        inv.arg(source)
    }

    /// Installs a package from `source` into its own tool environment.
    pub async fn install_package(&self, source: &str, force: bool) -> ProvisionResult<CommandOutput> {
        if self.resolve().is_none() {
            return Err(ProvisionError::ToolchainInstallFailure {
                tool: TOOLCHAIN.to_string(),
            });
        }
        self.host.run(&self.install_command(source, force)).await
    }

    async fn bootstrap(&self) -> ProvisionResult<()> {
        let script = tempfile::Builder::new()
            .prefix("uv-install-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| ProvisionError::io(std::env::temp_dir(), e))?;
        let script_path = script.path().to_string_lossy().into_owned();

        info!("⬇️ Fetching {} installer from {}", TOOLCHAIN, self.installer_url);
        let fetch = Invocation::new("curl")
            .args(["-LsSf", "--proto", "=https", "-o", script_path.as_str(), "--"])
            .arg(self.installer_url.as_str());
        let fetched = self.host.run(&fetch).await?;
        if !fetched.success() {
            return Err(ProvisionError::CommandFailed {
                command: fetch.to_string(),
                detail: fetched.failure_detail(),
            });
        }

        let ran = self.host.run(&Invocation::new("sh").arg(script_path.as_str())).await?;
        if !ran.success() {
            warn!("{} installer reported: {}", TOOLCHAIN, ran.failure_detail());
        }
        // `script` is dropped (and deleted) only after the installer has exited.
        drop(script);
        Ok(())
    }
}

#[async_trait]
impl ProvisioningStep for ToolchainInstaller {
    fn name(&self) -> &'static str {
        "toolchain"
    }

    fn stage(&self) -> Stage {
        Stage::InstallingToolchain
    }

    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        self.resolve().is_some()
    }

    async fn apply(&self, _profile: &SystemProfile) -> ProvisionResult<StepReport> {
        let prompt = format!("{TOOLCHAIN} (Python tool installer) is not installed. Install it now?");
        if !self.gate.confirm(&prompt, true).await {
            return Err(ProvisionError::UserDeclined {
                component: TOOLCHAIN.to_string(),
            });
        }

        self.bootstrap().await?;

        match self.resolve() {
            Some(path) => {
                info!("✅ {} installed at {}", TOOLCHAIN, path.display());
                Ok(StepReport::Applied)
            }
            None => Err(ProvisionError::ToolchainInstallFailure {
                tool: TOOLCHAIN.to_string(),
            }),
        }
    }
}
