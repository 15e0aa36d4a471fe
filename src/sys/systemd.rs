// src/sys/systemd.rs

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::APP_NAME;
use crate::error::{ProvisionError, ProvisionResult, Severity};
use crate::orchestrator::Stage;
use crate::sys::profile::SystemProfile;
use crate::sys::traits::{Host, Invocation, ProvisioningStep, StepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnFailure => "on-failure",
        }
    }
}

/// One `ExecStart=` word: `%` is doubled so it is not read as a specifier, and
/// the path is double-quoted (backslashes and `"` escaped) when it contains
/// whitespace or quoting characters.
pub fn exec_word(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('%', "%%");
    if raw.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';')) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Declarative user unit. The service manager owns the lifecycle once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub description: String,
    pub executable_path: PathBuf,
    pub restart_policy: RestartPolicy,
    pub restart_delay_seconds: u32,
    pub activation_target: String,
    pub install_target: String,
}

impl ServiceDefinition {
    pub fn for_entry_point(executable_path: PathBuf) -> Self {
        Self {
            description: "BlurCam virtual camera daemon".to_string(),
            executable_path,
            restart_policy: RestartPolicy::OnFailure,
            restart_delay_seconds: 5,
            activation_target: "graphical-session.target".to_string(),
            install_target: "default.target".to_string(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            r#"[Unit]
Description={description}
After={after}

[Service]
Type=simple
ExecStart={exec_start}
Restart={restart}
RestartSec={restart_sec}

[Install]
WantedBy={wanted_by}
"#,
            description = self.description,
            after = self.activation_target,
            exec_start = exec_word(&self.executable_path),
            restart = self.restart_policy.as_str(),
            restart_sec = self.restart_delay_seconds,
            wanted_by = self.install_target,
        )
    }
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn write_unit_file(&self, unit_name: &str, definition: &ServiceDefinition) -> ProvisionResult<PathBuf>;
    async fn reload_daemon(&self) -> ProvisionResult<()>;
    async fn enable_and_start(&self, unit_name: &str) -> ProvisionResult<()>;
}

/// `systemctl --user` against `~/.config/systemd/user`.
pub struct UserSystemdManager {
    host: Arc<dyn Host>,
    unit_dir: PathBuf,
}

impl UserSystemdManager {
    pub fn new(host: Arc<dyn Host>, unit_dir: PathBuf) -> Self {
        Self { host, unit_dir }
    }

    async fn systemctl(&self, args: &[&str]) -> ProvisionResult<()> {
        let inv = Invocation::new("systemctl").arg("--user").args(args.iter().copied());
        let out = self.host.run(&inv).await?;
        if !out.success() {
            return Err(ProvisionError::ServiceRegistrationFailure {
                detail: format!("`{inv}` failed: {}", out.failure_detail()),
                severity: Severity::Warn,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for UserSystemdManager {
    async fn write_unit_file(&self, unit_name: &str, definition: &ServiceDefinition) -> ProvisionResult<PathBuf> {
        let path = self.unit_dir.join(unit_name);
        self.host
            .write_file(&path, &definition.render())
            .await
            .map_err(|e| ProvisionError::ServiceRegistrationFailure {
                detail: format!("could not write {}: {e}", path.display()),
                severity: Severity::Fatal,
            })?;
        Ok(path)
    }

    async fn reload_daemon(&self) -> ProvisionResult<()> {
        self.systemctl(&["daemon-reload"]).await
    }

    async fn enable_and_start(&self, unit_name: &str) -> ProvisionResult<()> {
        self.systemctl(&["enable", "--now", unit_name]).await
    }
}

pub struct ServiceRegistrar {
    host: Arc<dyn Host>,
    manager: Box<dyn ServiceManager>,
    unit_name: String,
}

impl ServiceRegistrar {
    pub fn new(host: Arc<dyn Host>, manager: Box<dyn ServiceManager>, unit_name: String) -> Self {
        Self {
            host,
            manager,
            unit_name,
        }
    }

    pub async fn register(&self) -> ProvisionResult<PathBuf> {
        let entry_point = self.host.which(APP_NAME).ok_or_else(|| {
            ProvisionError::ServiceRegistrationFailure {
                detail: format!("`{APP_NAME}` is not on PATH; nothing to run"),
                severity: Severity::Fatal,
            }
        })?;

        let definition = ServiceDefinition::for_entry_point(entry_point);
        let unit_path = self.manager.write_unit_file(&self.unit_name, &definition).await?;
        info!("📝 Wrote {}", unit_path.display());

        if let Err(e) = self.start().await {
            warn!(
                "Start it manually with: systemctl --user daemon-reload && systemctl --user enable --now {}",
                self.unit_name
            );
            return Err(e);
        }
        Ok(unit_path)
    }

    async fn start(&self) -> ProvisionResult<()> {
        self.manager.reload_daemon().await?;
        self.manager.enable_and_start(&self.unit_name).await
    }
}

#[async_trait]
impl ProvisioningStep for ServiceRegistrar {
    fn name(&self) -> &'static str {
        "user service"
    }

    fn stage(&self) -> Stage {
        Stage::RegisteringService
    }

    /// The unit is rewritten on every run.
    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        false
    }

    async fn apply(&self, _profile: &SystemProfile) -> ProvisionResult<StepReport> {
        self.register().await?;
        info!("🚀 {} enabled and started", self.unit_name);
        Ok(StepReport::Applied)
    }
}
