// src/sys/testing.rs
//
// Scripted stand-ins for the host and the operator, shared by unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ProvisionResult;
use crate::sys::traits::{CommandOutput, Host, InteractionGate, Invocation, KernelFacts};

pub const HOME: &str = "/home/alice";

/// What a matching command does to the fake host once it has run.
#[derive(Debug, Clone)]
pub enum Effect {
    CreatePath(PathBuf),
    InstallProgram { name: String, dir: PathBuf },
    /// Future commands starting with the prefix answer with this output.
    Respond(String, CommandOutput),
}

#[derive(Debug)]
pub struct FakeState {
    pub euid: u32,
    pub sysname: String,
    pub machine: String,
    pub release: String,
    pub username: String,
    pub cwd: PathBuf,
    /// Program name to the directory that holds it.
    pub programs: BTreeMap<String, PathBuf>,
    pub search_path: Vec<PathBuf>,
    pub paths: BTreeSet<PathBuf>,
    pub files: BTreeMap<PathBuf, String>,
    pub responses: Vec<(String, CommandOutput)>,
    pub effects: Vec<(String, Effect)>,
    pub commands: Vec<String>,
    pub pauses: usize,
}

pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    /// An unprivileged user on a stock x86_64 Ubuntu box with no package
    /// manager on the path. Every command succeeds silently unless scripted.
    pub fn new() -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("/etc/os-release"),
            "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n".to_string(),
        );
        Self {
            state: Mutex::new(FakeState {
                euid: 1000,
                sysname: "Linux".into(),
                machine: "x86_64".into(),
                release: "6.8.0-45-generic".into(),
                username: "alice".into(),
                cwd: PathBuf::from(HOME),
                programs: BTreeMap::new(),
                search_path: vec![PathBuf::from("/usr/bin")],
                paths: BTreeSet::new(),
                files,
                responses: Vec::new(),
                effects: Vec::new(),
                commands: Vec::new(),
                pauses: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.lock());
        self
    }

    /// Puts `name` in `/usr/bin`.
    pub fn program(self, name: &str) -> Self {
        self.with(|s| {
            s.programs.insert(name.to_string(), PathBuf::from("/usr/bin"));
        })
    }

    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.with(|s| {
            s.paths.insert(path);
        })
    }

    pub fn file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        let path = path.into();
        self.with(|s| {
            s.files.insert(path, contents.to_string());
        })
    }

    /// Later registrations take precedence over earlier ones.
    pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
        self.with(|s| s.responses.insert(0, (prefix.to_string(), output)))
    }

    pub fn on(self, prefix: &str, effect: Effect) -> Self {
        self.with(|s| s.effects.push((prefix.to_string(), effect)))
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.lock().commands.iter().position(|c| c.starts_with(prefix))
    }

    pub fn file_contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock().files.get(path.as_ref()).cloned()
    }

    pub fn files(&self) -> BTreeMap<PathBuf, String> {
        self.lock().files.clone()
    }

    pub fn pauses(&self) -> usize {
        self.lock().pauses
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, invocation: &Invocation) -> ProvisionResult<CommandOutput> {
        let line = invocation.to_string();
        let mut state = self.lock();
        state.commands.push(line.clone());

        // `tee` (optionally under sudo) writes its stdin to the named file.
        let mut argv: Vec<&str> = std::iter::once(invocation.program.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect();
        if argv.first() == Some(&"sudo") {
            argv.remove(0);
        }
        if argv.first() == Some(&"tee") {
            if let (Some(target), Some(input)) = (argv.last(), &invocation.stdin) {
                state.files.insert(PathBuf::from(*target), input.clone());
            }
        }

        let output = state
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));

        let effects: Vec<Effect> = state
            .effects
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, effect)| effect.clone())
            .collect();
        for effect in effects {
            match effect {
                Effect::CreatePath(path) => {
                    state.paths.insert(path);
                }
                Effect::InstallProgram { name, dir } => {
                    state.programs.insert(name, dir);
                }
                Effect::Respond(prefix, out) => state.responses.insert(0, (prefix, out)),
            }
        }

        Ok(output)
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.paths.contains(path) || state.files.contains_key(path)
    }

    async fn read_file(&self, path: &Path) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    async fn write_file(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        self.lock().files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        let state = self.lock();
        state
            .programs
            .get(program)
            .filter(|dir| state.search_path.contains(*dir))
            .map(|dir| dir.join(program))
    }

    fn extend_search_path(&self, dirs: &[PathBuf]) {
        let mut state = self.lock();
        for dir in dirs {
            if !state.search_path.contains(dir) {
                state.search_path.insert(0, dir.clone());
            }
        }
    }

    fn effective_uid(&self) -> u32 {
        self.lock().euid
    }

    fn kernel(&self) -> ProvisionResult<KernelFacts> {
        let state = self.lock();
        Ok(KernelFacts {
            sysname: state.sysname.clone(),
            machine: state.machine.clone(),
            release: state.release.clone(),
        })
    }

    fn username(&self) -> ProvisionResult<String> {
        Ok(self.lock().username.clone())
    }

    fn current_dir(&self) -> ProvisionResult<PathBuf> {
        Ok(self.lock().cwd.clone())
    }

    async fn pause(&self, _duration: Duration) {
        self.lock().pauses += 1;
    }
}

/// Canned answers, consumed in order; `fallback` once they run out.
pub struct ScriptedGate {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn always(answer: bool) -> Self {
        Self::answering([], answer)
    }

    pub fn answering(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InteractionGate for ScriptedGate {
    async fn confirm(&self, prompt: &str, _default_yes: bool) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

/// A fresh apt-based host: nothing installed, device absent, user not in
/// the video group, no local manifest. Installers leave the host in the
/// state a real run would.
pub fn fresh_apt_host() -> FakeHost {
    let local_bin = PathBuf::from(HOME).join(".local/bin");
    FakeHost::new()
        .program("apt-get")
        .respond("modinfo v4l2loopback", CommandOutput::failed(1, "modinfo: ERROR: Module v4l2loopback not found."))
        .respond("id -nG alice", CommandOutput::ok("alice adm sudo\n"))
        .on(
            "sh ",
            Effect::InstallProgram { name: "uv".into(), dir: local_bin.clone() },
        )
        .on(
            "sudo apt-get install",
            Effect::Respond("modinfo v4l2loopback".into(), CommandOutput::ok("filename: v4l2loopback.ko\n")),
        )
        .on("sudo modprobe v4l2loopback", Effect::CreatePath(PathBuf::from("/dev/video10")))
        .on(
            "sudo usermod -aG video alice",
            Effect::Respond("id -nG alice".into(), CommandOutput::ok("alice adm sudo video\n")),
        )
        .on(
            "uv tool install",
            Effect::InstallProgram { name: "blurcam".into(), dir: local_bin },
        )
}
