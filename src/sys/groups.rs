// src/sys/groups.rs

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Stage;
use crate::sys::privilege::PrivilegeContext;
use crate::sys::profile::SystemProfile;
use crate::sys::traits::{Host, Invocation, ProvisioningStep, StepReport};

/// Puts the invoking user in the group that owns `/dev/video*`.
pub struct PermissionManager {
    host: Arc<dyn Host>,
    privilege: Arc<PrivilegeContext>,
    group: String,
}

impl PermissionManager {
    pub fn new(host: Arc<dyn Host>, privilege: Arc<PrivilegeContext>, group: &str) -> Self {
        Self {
            host,
            privilege,
            group: group.to_string(),
        }
    }

    /// Membership as recorded in the group database, not just this session's.
    pub async fn is_member(host: &dyn Host, group: &str) -> bool {
        let Ok(user) = host.username() else {
            return false;
        };
        match host.run(&Invocation::new("id").args(["-nG", user.as_str()])).await {
            Ok(out) if out.success() => out.stdout.split_whitespace().any(|g| g == group),
            _ => false,
        }
    }
}

#[async_trait]
impl ProvisioningStep for PermissionManager {
    fn name(&self) -> &'static str {
        "device permissions"
    }

    fn stage(&self) -> Stage {
        Stage::SettingPermissions
    }

    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        Self::is_member(self.host.as_ref(), &self.group).await
    }

    async fn apply(&self, _profile: &SystemProfile) -> ProvisionResult<StepReport> {
        let user = self.host.username()?;

        // 🛡️ Input validation before the name reaches usermod.
        if user.is_empty() || user.starts_with('-') {
            return Err(ProvisionError::Environment(format!("refusing suspicious user name '{user}'")));
        }

        let add = Invocation::new("usermod").args(["-aG", self.group.as_str(), user.as_str()]);
        let out = self.privilege.run(&add).await?;
        if !out.success() {
            return Err(ProvisionError::CommandFailed {
                command: format!("sudo {add}"),
                detail: out.failure_detail(),
            });
        }

        info!("👥 Added {} to the '{}' group", user, self.group);
        Ok(StepReport::Advisory(format!(
            "Group '{}' takes effect at your next login; log out and back in before using the camera",
            self.group
        )))
    }
}
