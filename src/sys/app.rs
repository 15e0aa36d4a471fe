// src/sys/app.rs

use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::info;

use crate::config::APP_NAME;
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Stage;
use crate::sys::profile::SystemProfile;
use crate::sys::toolchain::ToolchainInstaller;
use crate::sys::traits::{Host, ProvisioningStep, StepReport};

const MANIFEST: &str = "pyproject.toml";

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]+)\]\s*$").expect("static regex"));
static NAME_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*name\s*=\s*["']([^"']+)["']"#).expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSource {
    /// A working copy of this application in the current directory.
    Local(PathBuf),
    /// A version-controlled locator understood by the toolchain.
    Remote(String),
}

impl fmt::Display for AppSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(locator) => f.write_str(locator),
        }
    }
}

/// `[project] name` from a pyproject manifest.
pub fn project_name(manifest: &str) -> Option<String> {
    let mut in_project = false;
    for line in manifest.lines() {
        if let Some(caps) = SECTION_HEADER.captures(line) {
            in_project = caps[1].trim() == "project";
            continue;
        }
        if in_project {
            if let Some(caps) = NAME_KEY.captures(line) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

pub struct ApplicationInstaller {
    host: Arc<dyn Host>,
    toolchain: Arc<ToolchainInstaller>,
    remote_source: String,
    user_bin_dirs: Vec<PathBuf>,
}

impl ApplicationInstaller {
    pub fn new(
        host: Arc<dyn Host>,
        toolchain: Arc<ToolchainInstaller>,
        remote_source: String,
        user_bin_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            host,
            toolchain,
            remote_source,
            user_bin_dirs,
        }
    }

    pub async fn resolve_source(&self) -> ProvisionResult<AppSource> {
        let cwd = self.host.current_dir()?;
        if let Some(manifest) = self.host.read_file(&cwd.join(MANIFEST)).await {
            if project_name(&manifest).as_deref() == Some(APP_NAME) {
                return Ok(AppSource::Local(cwd));
            }
        }
        Ok(AppSource::Remote(self.remote_source.clone()))
    }

    /// Installs (always overwriting) and returns the resolved entry point.
    pub async fn install(&self) -> ProvisionResult<PathBuf> {
        let source = self.resolve_source().await?.to_string();
        if source.starts_with('-') {
            return Err(ProvisionError::Config(format!(
                "application source '{source}' looks like a command-line flag"
            )));
        }

        info!("📥 Installing {} from {}", APP_NAME, source);
        let out = self.toolchain.install_package(&source, true).await?;
        if !out.success() {
            // An older entry point may still resolve; it must not pass for this install.
            return Err(ProvisionError::CommandFailed {
                command: self.toolchain.install_command(&source, true).to_string(),
                detail: out.failure_detail(),
            });
        }

        self.host.extend_search_path(&self.user_bin_dirs);
        self.host
            .which(APP_NAME)
            .ok_or_else(|| ProvisionError::ApplicationInstallFailure {
                entry_point: APP_NAME.to_string(),
                remediation: self.toolchain.install_command(&source, true).to_string(),
            })
    }
}

#[async_trait]
impl ProvisioningStep for ApplicationInstaller {
    fn name(&self) -> &'static str {
        "application"
    }

    fn stage(&self) -> Stage {
        Stage::InstallingApplication
    }

    /// Always reinstalled so the latest source wins.
    async fn is_satisfied(&self, _profile: &SystemProfile) -> bool {
        false
    }

    async fn apply(&self, _profile: &SystemProfile) -> ProvisionResult<StepReport> {
        let entry_point = self.install().await?;
        info!("✅ {} available at {}", APP_NAME, entry_point.display());
        Ok(StepReport::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::{Effect, FakeHost, HOME, ScriptedGate};
    use crate::sys::traits::CommandOutput;
    use std::path::Path;

    fn local_bin() -> PathBuf {
        Path::new(HOME).join(".local/bin")
    }

    fn installer(host: &Arc<FakeHost>) -> ApplicationInstaller {
        let toolchain = Arc::new(ToolchainInstaller::new(
            host.clone(),
            Arc::new(ScriptedGate::always(true)),
            "https://example.invalid/uv/install.sh".into(),
            vec![local_bin()],
        ));
        ApplicationInstaller::new(
            host.clone(),
            toolchain,
            "git+https://example.invalid/blurcam".into(),
            vec![local_bin()],
        )
    }

    fn with_uv() -> FakeHost {
        FakeHost::new().program("uv")
    }

    #[test]
    fn project_name_reads_only_the_project_table() {
        let manifest = "[build-system]\nname = \"hatchling\"\n\n[project]\nname = \"blurcam\"\nversion = \"0.3.0\"\n";
        assert_eq!(project_name(manifest).as_deref(), Some("blurcam"));
        assert_eq!(project_name("[tool.uv]\nname = 'x'\n"), None);
    }

    #[tokio::test]
    async fn matching_local_manifest_installs_from_working_copy() {
        let host = Arc::new(
            with_uv()
                .with(|s| s.cwd = "/home/alice/src/blurcam".into())
                .file("/home/alice/src/blurcam/pyproject.toml", "[project]\nname = \"blurcam\"\n")
                .on("uv tool install", Effect::InstallProgram { name: "blurcam".into(), dir: local_bin() }),
        );
        let entry = installer(&host).install().await.unwrap();

        assert_eq!(entry, local_bin().join("blurcam"));
        assert_eq!(host.commands(), vec!["uv tool install --force /home/alice/src/blurcam"]);
    }

    #[tokio::test]
    async fn foreign_manifest_falls_back_to_remote() {
        let host = Arc::new(
            with_uv()
                .file("/home/alice/pyproject.toml", "[project]\nname = \"something-else\"\n")
                .on("uv tool install", Effect::InstallProgram { name: "blurcam".into(), dir: local_bin() }),
        );
        let step = installer(&host);
        assert_eq!(
            step.resolve_source().await.unwrap(),
            AppSource::Remote("git+https://example.invalid/blurcam".into())
        );
        step.install().await.unwrap();
        assert!(host.ran("uv tool install --force git+https://example.invalid/blurcam"));
    }

    #[tokio::test]
    async fn missing_entry_point_is_fatal_with_exact_retry_command() {
        let host = Arc::new(with_uv());
        let err = installer(&host).install().await.unwrap_err();

        match err {
            ProvisionError::ApplicationInstallFailure { remediation, .. } => {
                assert_eq!(remediation, "uv tool install --force git+https://example.invalid/blurcam");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failed_reinstall_is_not_masked_by_an_older_entry_point() {
        let host = Arc::new(
            with_uv()
                .with(|s| {
                    s.programs.insert("blurcam".into(), local_bin());
                })
                .respond("uv tool install", CommandOutput::failed(2, "error: Failed to fetch")),
        );
        let err = installer(&host).install().await.unwrap_err();

        match err {
            ProvisionError::CommandFailed { command, detail } => {
                assert_eq!(command, "uv tool install --force git+https://example.invalid/blurcam");
                assert_eq!(detail, "error: Failed to fetch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn flag_like_source_is_rejected() {
        let host = Arc::new(with_uv());
        let toolchain = Arc::new(ToolchainInstaller::new(
            host.clone(),
            Arc::new(ScriptedGate::always(true)),
            String::new(),
            vec![],
        ));
        let step = ApplicationInstaller::new(host.clone(), toolchain, "--index-url=evil".into(), vec![]);

        assert!(matches!(step.install().await, Err(ProvisionError::Config(_))));
        assert!(host.commands().is_empty());
    }
}
