// src/sys/privilege.rs

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};
use crate::sys::traits::{CommandOutput, Host, Invocation};

/// Elevated-rights state for one run.
///
/// Credentials are requested once with `sudo -v`; later calls lean on sudo's
/// own timestamp cache instead of prompting again. The run is assumed to
/// finish inside that cache window.
pub struct PrivilegeContext {
    host: Arc<dyn Host>,
    authorized: AtomicBool,
}

impl PrivilegeContext {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            authorized: AtomicBool::new(false),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    pub async fn acquire(&self) -> ProvisionResult<()> {
        if self.is_authorized() {
            return Ok(());
        }

        info!("🔐 Administrator rights are needed for the next step (sudo)");
        let out = self.host.run(&Invocation::new("sudo").arg("-v")).await?;
        if !out.success() {
            return Err(ProvisionError::PrivilegeDenied(out.failure_detail()));
        }

        self.authorized.store(true, Ordering::Release);
        Ok(())
    }

    /// Runs `invocation` under sudo. Non-zero exits come back in the output.
    pub async fn run(&self, invocation: &Invocation) -> ProvisionResult<CommandOutput> {
        self.acquire().await?;
        self.host.run(&elevate(invocation)).await
    }

    /// Writes a root-owned file by piping `contents` through `sudo tee`.
    pub async fn write_file(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        let tee = Invocation::new("tee")
            .arg(path.to_string_lossy())
            .stdin(contents);
        let out = self.run(&tee).await?;
        if !out.success() {
            return Err(ProvisionError::io(
                path,
                std::io::Error::other(out.failure_detail()),
            ));
        }
        Ok(())
    }
}

fn elevate(invocation: &Invocation) -> Invocation {
    Invocation {
        program: "sudo".to_string(),
        args: std::iter::once(invocation.program.clone())
            .chain(invocation.args.iter().cloned())
            .collect(),
        stdin: invocation.stdin.clone(),
    }
}
