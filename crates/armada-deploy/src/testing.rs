use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use armada_common::DeviceProfile;
use armada_exec::{CommandOutput, ExecError, ExecutorFactory, RemoteExecutor};

use crate::error::DeployError;
use crate::installer::{InstallUnit, ServiceInstaller, Step, StepEnv};

/// Files written through `printf '%s' TOKEN > PATH` and read back through
/// `cat PATH`, shared by every executor in a test so a write on one node
/// is visible on another. Keyed by file name.
pub type SharedDisk = Arc<Mutex<HashMap<String, String>>>;

fn file_name(path: &str) -> String {
    let path = path.trim().trim_matches('\'');
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Records every command and answers from substring rules (exit 0 otherwise).
pub struct RecordingExecutor {
    target: String,
    commands: Mutex<Vec<String>>,
    transfers: Mutex<Vec<String>>,
    failing: Vec<String>,
    disk: Option<SharedDisk>,
}

impl RecordingExecutor {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            commands: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            failing: Vec::new(),
            disk: None,
        }
    }

    /// Commands containing `pattern` exit 1.
    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    pub fn with_disk(mut self, disk: SharedDisk) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<String> {
        self.transfers.lock().unwrap().clone()
    }

    fn answer(&self, cmd: &str) -> CommandOutput {
        if self.failing.iter().any(|p| cmd.contains(p.as_str())) {
            return CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "scripted failure".into(),
            };
        }
        let mut out = CommandOutput::default();
        if let Some(disk) = &self.disk {
            if let Some(rest) = cmd.strip_prefix("printf '%s' ") {
                if let Some((token, path)) = rest.split_once(" > ") {
                    disk.lock().unwrap().insert(file_name(path), token.trim_matches('\'').to_string());
                }
            } else if let Some(path) = cmd.strip_prefix("cat ") {
                match disk.lock().unwrap().get(&file_name(path)) {
                    Some(content) => out.stdout = content.clone(),
                    None => out.exit_code = 1,
                }
            }
        }
        out
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    fn target(&self) -> &str {
        &self.target
    }

    async fn execute(&self, cmd: &str, _timeout: Duration) -> Result<CommandOutput, ExecError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        Ok(self.answer(cmd))
    }

    async fn transfer_file(&self, _local: &Path, remote: &str) -> bool {
        self.transfers.lock().unwrap().push(remote.to_string());
        true
    }

    async fn transfer_directory(&self, _local: &Path, remote: &str, _excludes: &[String]) -> bool {
        self.transfers.lock().unwrap().push(remote.to_string());
        true
    }

    async fn create_directory(&self, _path: &str) -> bool {
        true
    }
}

/// Hands out one pre-built executor per device address.
#[derive(Default)]
pub struct FakeFactory {
    pub executors: HashMap<String, Arc<RecordingExecutor>>,
}

impl FakeFactory {
    pub fn add(&mut self, exec: RecordingExecutor) -> Arc<RecordingExecutor> {
        let exec = Arc::new(exec);
        self.executors.insert(exec.target().to_string(), exec.clone());
        exec
    }
}

impl ExecutorFactory for FakeFactory {
    fn executor_for(&self, device: &DeviceProfile) -> Arc<dyn RemoteExecutor> {
        match self.executors.get(&device.address) {
            Some(e) => e.clone(),
            None => Arc::new(RecordingExecutor::new(&device.address)),
        }
    }
}

/// Step log entry: `(node, unit, step)`.
pub type StepRecord = (String, &'static str, Step);

/// Installer that succeeds unless told otherwise. Units in `present` pass
/// their first check; every unit passes its check once started.
#[derive(Default)]
pub struct FakeInstaller {
    pub present: HashSet<(String, &'static str)>,
    pub fail: Option<(String, &'static str, Step)>,
    pub log: Mutex<Vec<StepRecord>>,
    pub started: Mutex<HashSet<(String, &'static str)>>,
}

impl FakeInstaller {
    pub fn steps(&self) -> Vec<StepRecord> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceInstaller for FakeInstaller {
    async fn run_step(
        &self,
        exec: &dyn RemoteExecutor,
        unit: InstallUnit,
        step: Step,
        _env: &StepEnv,
    ) -> Result<CommandOutput, DeployError> {
        let node = exec.target().to_string();
        self.log.lock().unwrap().push((node.clone(), unit.name(), step));
        let key = (node.clone(), unit.name());

        let failed = self
            .fail
            .as_ref()
            .is_some_and(|(n, u, s)| *n == node && *u == unit.name() && *s == step);
        let ok = match step {
            _ if failed => false,
            Step::Check => self.present.contains(&key) || self.started.lock().unwrap().contains(&key),
            Step::Start => {
                self.started.lock().unwrap().insert(key);
                true
            }
            Step::Install | Step::Configure => true,
        };
        Ok(CommandOutput {
            exit_code: if ok { 0 } else { 1 },
            stdout: String::new(),
            stderr: if ok { String::new() } else { format!("{} failed", step.as_str()) },
        })
    }
}
