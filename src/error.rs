// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// How the orchestrator treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the run with a non-zero exit.
    Fatal,
    /// Surface the problem and continue with the next step.
    Warn,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Superuser invocation, unsupported kernel or unsupported architecture.
    #[error("Unsupported environment: {0}")]
    Environment(String),

    #[error("{component} is required and was declined. Re-run when you are ready to install it.")]
    UserDeclined { component: String },

    #[error(
        "{tool} is still not on PATH after running its installer. Restart your shell (or log out and back in) and re-run."
    )]
    ToolchainInstallFailure { tool: String },

    #[error("{manager} failed running `{command}`: {detail}")]
    PackageManagerFailure {
        manager: String,
        command: String,
        detail: String,
    },

    #[error("No supported package manager found (dnf, apt, pacman). Install the module manually:\n{instructions}")]
    UnknownPackageManager { instructions: String },

    #[error("{device} did not appear after loading {module}; a reboot may be required")]
    ModuleLoadFailure { module: String, device: PathBuf },

    #[error("`{entry_point}` is not on PATH after installation. Retry manually with:\n  {remediation}")]
    ApplicationInstallFailure {
        entry_point: String,
        remediation: String,
    },

    #[error("Service registration failed: {detail}")]
    ServiceRegistrationFailure { detail: String, severity: Severity },

    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("Administrator privileges were not granted: {0}")]
    PrivilegeDenied(String),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProvisionError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ModuleLoadFailure { .. } => Severity::Warn,
            Self::ServiceRegistrationFailure { severity, .. } => *severity,
            _ => Severity::Fatal,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
