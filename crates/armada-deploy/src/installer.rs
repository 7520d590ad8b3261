use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use armada_common::{InstallPhase, ServiceKind};
use armada_exec::{shell_quote, CommandOutput, RemoteExecutor};

use crate::config::DeployConfig;
use crate::error::DeployError;

/// Something the orchestrator brings up on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallUnit {
    Base,
    Tls,
    Service(ServiceKind),
}

impl InstallUnit {
    pub fn name(self) -> &'static str {
        match self {
            InstallUnit::Base => "base",
            InstallUnit::Tls => "tls",
            InstallUnit::Service(kind) => kind.as_str(),
        }
    }

    pub fn phase(self) -> InstallPhase {
        match self {
            InstallUnit::Base => InstallPhase::BasePackages,
            InstallUnit::Tls => InstallPhase::Tls,
            InstallUnit::Service(kind) => kind.phase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Exit 0 when the unit is already present and running.
    Check,
    Install,
    Configure,
    /// Start and wait until the unit answers.
    Start,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Check, Step::Install, Step::Configure, Step::Start];

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Check => "check",
            Step::Install => "install",
            Step::Configure => "configure",
            Step::Start => "start",
        }
    }

    pub fn script(self) -> &'static str {
        match self {
            Step::Check => "check.sh",
            Step::Install => "install.sh",
            Step::Configure => "configure.sh",
            Step::Start => "start.sh",
        }
    }
}

/// Environment variables handed to every step script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepEnv {
    vars: BTreeMap<String, String>,
}

impl StepEnv {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// `K='v' ` assignments to prefix a shell command with.
    pub fn shell_prefix(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{k}={} ", shell_quote(v)))
            .collect()
    }
}

/// Runs the per-unit install steps on a node.
#[async_trait]
pub trait ServiceInstaller: Send + Sync {
    /// A non-zero exit is returned as `Ok`; the orchestrator decides what it
    /// means for each step.
    async fn run_step(
        &self,
        exec: &dyn RemoteExecutor,
        unit: InstallUnit,
        step: Step,
        env: &StepEnv,
    ) -> Result<CommandOutput, DeployError>;
}

/// Runs `<scripts_dir>/<unit>/<step>.sh` after copying the unit's directory
/// to the node.
///
/// A missing `configure.sh` counts as success and a missing `check.sh` as
/// "not present"; missing `install.sh` or `start.sh` is an error.
#[derive(Debug)]
pub struct ScriptInstaller {
    scripts_dir: PathBuf,
    remote_dir: String,
    command_timeout: Duration,
    check_timeout: Duration,
    staged: Mutex<HashSet<(String, &'static str)>>,
}

impl ScriptInstaller {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            scripts_dir: config.scripts_dir.clone(),
            remote_dir: config.remote_dir.trim_end_matches('/').to_string(),
            command_timeout: config.command_timeout,
            check_timeout: config.check_timeout,
            staged: Mutex::new(HashSet::new()),
        }
    }

    fn remote_unit_dir(&self, unit: InstallUnit) -> String {
        format!("{}/{}", self.remote_dir, unit.name())
    }

    fn is_staged(&self, key: &(String, &'static str)) -> bool {
        self.staged
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(key)
    }

    async fn stage(&self, exec: &dyn RemoteExecutor, unit: InstallUnit) -> Result<(), DeployError> {
        let key = (exec.target().to_string(), unit.name());
        if self.is_staged(&key) {
            return Ok(());
        }
        let local = self.scripts_dir.join(unit.name());
        let remote = self.remote_unit_dir(unit);
        if !exec.transfer_directory(&local, &remote, &[]).await {
            return Err(DeployError::Transfer {
                target: exec.target().to_string(),
                path: local,
            });
        }
        tracing::debug!(target_host = %exec.target(), unit = unit.name(), remote = %remote, "scripts staged");
        self.staged
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key);
        Ok(())
    }
}

#[async_trait]
impl ServiceInstaller for ScriptInstaller {
    async fn run_step(
        &self,
        exec: &dyn RemoteExecutor,
        unit: InstallUnit,
        step: Step,
        env: &StepEnv,
    ) -> Result<CommandOutput, DeployError> {
        let local_script = self.scripts_dir.join(unit.name()).join(step.script());
        if !local_script.is_file() {
            return match step {
                Step::Configure => Ok(CommandOutput::default()),
                Step::Check => Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "no check script".to_string(),
                }),
                Step::Install | Step::Start => Err(DeployError::MissingScript {
                    unit: unit.name().to_string(),
                    step: step.as_str(),
                    path: local_script,
                }),
            };
        }

        self.stage(exec, unit).await?;
        let cmd = format!(
            "cd {} && {}sh ./{}",
            shell_quote(&self.remote_unit_dir(unit)),
            env.shell_prefix(),
            step.script()
        );
        let timeout = match step {
            Step::Check => self.check_timeout,
            _ => self.command_timeout,
        };
        let out = exec.execute(&cmd, timeout).await?;
        tracing::debug!(
            target_host = %exec.target(),
            unit = unit.name(),
            step = step.as_str(),
            exit_code = out.exit_code,
            "step finished"
        );
        Ok(out)
    }
}
