// src/sys/traits.rs

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProvisionResult;
use crate::orchestrator::Stage;
use crate::sys::profile::SystemProfile;

// ==============================================================================
// 1. Process Invocation
// ==============================================================================

/// A program plus discrete arguments. Nothing is ever handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[cfg(test)]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, or the exit code when stderr is silent.
    pub fn failure_detail(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| match self.code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelFacts {
    pub sysname: String,
    pub machine: String,
    pub release: String,
}

// ==============================================================================
// 2. Host Abstraction (every side effect goes through here)
// ==============================================================================

#[async_trait]
pub trait Host: Send + Sync {
    /// Runs to completion. `Err` only when the process could not be spawned;
    /// a non-zero exit is reported through `CommandOutput`.
    async fn run(&self, invocation: &Invocation) -> ProvisionResult<CommandOutput>;

    fn exists(&self, path: &Path) -> bool;

    /// `None` when the file is missing or unreadable.
    async fn read_file(&self, path: &Path) -> Option<String>;

    /// Atomic write of a user-owned file, creating parent directories.
    async fn write_file(&self, path: &Path, contents: &str) -> ProvisionResult<()>;

    /// Resolves an executable on the (possibly extended) search path.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Prepends directories to the search path used by `which` and `run`.
    fn extend_search_path(&self, dirs: &[PathBuf]);

    fn effective_uid(&self) -> u32;

    fn kernel(&self) -> ProvisionResult<KernelFacts>;

    fn username(&self) -> ProvisionResult<String>;

    fn current_dir(&self) -> ProvisionResult<PathBuf>;

    async fn pause(&self, duration: Duration);
}

// ==============================================================================
// 3. Operator Interaction
// ==============================================================================

#[async_trait]
pub trait InteractionGate: Send + Sync {
    /// One prompt, one line of input. Anything but an affirmative is "no".
    async fn confirm(&self, prompt: &str, default_yes: bool) -> bool;
}

// ==============================================================================
// 4. Provisioning Steps
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepReport {
    /// The idempotency check passed; nothing was touched.
    AlreadySatisfied,
    Applied,
    /// Applied, with a notice the operator has to act on later.
    Advisory(String),
}

#[async_trait]
pub trait ProvisioningStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    /// Re-evaluated on every run, never cached.
    async fn is_satisfied(&self, profile: &SystemProfile) -> bool;

    async fn apply(&self, profile: &SystemProfile) -> ProvisionResult<StepReport>;

    async fn ensure(&self, profile: &SystemProfile) -> ProvisionResult<StepReport> {
        if self.is_satisfied(profile).await {
            return Ok(StepReport::AlreadySatisfied);
        }
        self.apply(profile).await
    }
}

// ==============================================================================
// 5. Package Manager Strategy
// ==============================================================================

#[async_trait]
pub trait PackageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Packages that provide the loopback module on this distribution family.
    fn module_packages(&self) -> &'static [&'static str];

    async fn refresh_index(&self) -> ProvisionResult<()> {
        Ok(())
    }

    async fn install_packages(&self, packages: &[&str]) -> ProvisionResult<()>;

    async fn install_kernel_module(&self, _profile: &SystemProfile) -> ProvisionResult<()> {
        self.refresh_index().await?;
        self.install_packages(self.module_packages()).await
    }
}
