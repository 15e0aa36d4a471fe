// src/sys/host.rs

use async_trait::async_trait;
use std::env;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};
use crate::sys::traits::{CommandOutput, Host, Invocation, KernelFacts};

/// The machine this process runs on.
pub struct LinuxHost {
    extra_path: Mutex<Vec<PathBuf>>,
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            extra_path: Mutex::new(Vec::new()),
        }
    }

    fn search_path(&self) -> Vec<PathBuf> {
        let mut dirs = self
            .extra_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(path) = env::var_os("PATH") {
            dirs.extend(env::split_paths(&path));
        }
        dirs
    }

    fn joined_search_path(&self) -> Option<OsString> {
        env::join_paths(self.search_path()).ok()
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains a child pipe line by line, echoing to the debug log as it goes.
async fn collect_lines<R: AsyncRead + Unpin>(pipe: Option<R>, stream: &'static str) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };
    let mut collected = String::new();
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stream, "{}", line);
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[async_trait]
impl Host for LinuxHost {
    async fn run(&self, invocation: &Invocation) -> ProvisionResult<CommandOutput> {
        debug!("▶ {}", invocation);

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = self.joined_search_path() {
            cmd.env("PATH", path);
        }

        let spawn_err = |source| ProvisionError::Spawn {
            command: invocation.to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let (Some(input), Some(mut pipe)) = (&invocation.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(spawn_err)?;
            // Dropping the pipe delivers EOF.
        }

        let (stdout, stderr) = tokio::join!(
            collect_lines(child.stdout.take(), "stdout"),
            collect_lines(child.stderr.take(), "stderr"),
        );
        let status = child.wait().await.map_err(spawn_err)?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    async fn read_file(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).await.ok()
    }

    async fn write_file(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvisionError::io(parent, e))?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, contents)
            .await
            .map_err(|e| ProvisionError::io(&tmp_path, e))?;

        let perms = std::fs::Permissions::from_mode(0o644);
        if let Err(e) = fs::set_permissions(&tmp_path, perms).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ProvisionError::io(&tmp_path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ProvisionError::io(path, e));
        }
        Ok(())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        self.search_path()
            .into_iter()
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }

    fn extend_search_path(&self, dirs: &[PathBuf]) {
        let mut extra = self
            .extra_path
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for dir in dirs.iter().rev() {
            if !extra.contains(dir) {
                extra.insert(0, dir.clone());
            }
        }
    }

    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn kernel(&self) -> ProvisionResult<KernelFacts> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| ProvisionError::Environment(format!("uname failed: {e}")))?;
        Ok(KernelFacts {
            sysname: uts.sysname().to_string_lossy().into_owned(),
            machine: uts.machine().to_string_lossy().into_owned(),
            release: uts.release().to_string_lossy().into_owned(),
        })
    }

    fn username(&self) -> ProvisionResult<String> {
        let uid = nix::unistd::getuid();
        match nix::unistd::User::from_uid(uid) {
            Ok(Some(user)) => Ok(user.name),
            _ => env::var("USER").map_err(|_| {
                ProvisionError::Environment(format!("cannot resolve a user name for uid {uid}"))
            }),
        }
    }

    fn current_dir(&self) -> ProvisionResult<PathBuf> {
        env::current_dir().map_err(|e| ProvisionError::io(".", e))
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
