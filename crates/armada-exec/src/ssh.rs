use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::credentials::Credential;
use crate::executor::{output_from, shell_quote, CommandOutput, ExecError, RemoteExecutor};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Drives a remote machine through the system `ssh`/`scp` binaries.
/// Password credentials go through `sshpass -e` so the secret never
/// appears on a command line.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    address: String,
    port: u16,
    username: String,
    password: Option<String>,
    identity_file: Option<PathBuf>,
}

impl SshExecutor {
    pub fn new(address: impl Into<String>, username: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            username: username.into(),
            password: None,
            identity_file: None,
        }
    }

    pub fn from_credential(address: impl Into<String>, cred: &Credential) -> Self {
        Self {
            address: address.into(),
            port: cred.port,
            username: cred.username.clone(),
            password: cred.password.clone().filter(|p| !p.is_empty()),
            identity_file: cred.identity_file.clone(),
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }

    fn common_options(&self) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        ];
        if self.password.is_none() {
            opts.push("-o".to_string());
            opts.push("BatchMode=yes".to_string());
        }
        if let Some(key) = &self.identity_file {
            opts.push("-i".to_string());
            opts.push(key.display().to_string());
        }
        opts
    }

    /// Arguments for `ssh` up to (not including) the remote command.
    pub(crate) fn ssh_args(&self) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination());
        args
    }

    pub(crate) fn scp_args(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(), remote));
        args
    }

    /// `ssh ...` as a single shell string, used inside local pipelines.
    fn ssh_shell_prefix(&self) -> String {
        let mut parts = Vec::new();
        if self.password.is_some() {
            parts.push("sshpass".to_string());
            parts.push("-e".to_string());
        }
        parts.push("ssh".to_string());
        parts.extend(self.ssh_args());
        parts.iter().map(|p| shell_quote(p)).collect::<Vec<_>>().join(" ")
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = if self.password.is_some() {
            let mut c = Command::new("sshpass");
            c.arg("-e").arg(program);
            c
        } else {
            Command::new(program)
        };
        if let Some(pw) = &self.password {
            cmd.env("SSHPASS", pw);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, program: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => Ok(output_from(out)),
            Ok(Err(source)) => Err(ExecError::Spawn {
                program: program.to_string(),
                source,
            }),
            Err(_) => Err(ExecError::Timeout {
                target: self.address.clone(),
                secs: timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn target(&self) -> &str {
        &self.address
    }

    async fn execute(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        tracing::debug!(host=%self.address, %cmd, "executing over ssh");
        let mut c = self.command("ssh");
        c.args(self.ssh_args()).arg(cmd);
        self.run(c, "ssh", timeout).await
    }

    async fn transfer_file(&self, local: &Path, remote: &str) -> bool {
        if let Some(parent) = Path::new(remote).parent().and_then(|p| p.to_str()) {
            if !parent.is_empty() && !self.create_directory(parent).await {
                return false;
            }
        }
        let mut c = self.command("scp");
        c.args(self.scp_args(local, remote));
        match self.run(c, "scp", TRANSFER_TIMEOUT).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                tracing::warn!(host=%self.address, %remote, stderr=%out.stderr.trim(), "scp failed");
                false
            }
            Err(e) => {
                tracing::warn!(host=%self.address, %remote, error=%e, "scp failed");
                false
            }
        }
    }

    async fn transfer_directory(&self, local: &Path, remote: &str, excludes: &[String]) -> bool {
        // tar | ssh tar keeps excludes and permissions without requiring rsync on either side.
        let mut tar = vec!["tar".to_string(), "-C".to_string(), shell_quote(&local.display().to_string())];
        for ex in excludes {
            tar.push(format!("--exclude={}", shell_quote(ex)));
        }
        tar.push("-cf".to_string());
        tar.push("-".to_string());
        tar.push(".".to_string());

        let remote_q = shell_quote(remote);
        let remote_cmd = format!("mkdir -p {remote_q} && tar -C {remote_q} -xf -");
        let pipeline = format!(
            "{} | {} {}",
            tar.join(" "),
            self.ssh_shell_prefix(),
            shell_quote(&remote_cmd)
        );

        let mut c = Command::new("sh");
        c.arg("-c").arg(&pipeline).kill_on_drop(true);
        if let Some(pw) = &self.password {
            c.env("SSHPASS", pw);
        }
        match self.run(c, "sh", TRANSFER_TIMEOUT).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                tracing::warn!(host=%self.address, %remote, stderr=%out.stderr.trim(), "directory transfer failed");
                false
            }
            Err(e) => {
                tracing::warn!(host=%self.address, %remote, error=%e, "directory transfer failed");
                false
            }
        }
    }

    async fn create_directory(&self, path: &str) -> bool {
        let cmd = format!("mkdir -p {}", shell_quote(path));
        matches!(
            self.execute(&cmd, Duration::from_secs(30)).await,
            Ok(out) if out.success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_auth_uses_batch_mode() {
        let exec = SshExecutor::new("10.0.0.9", "ops", 2222);
        let args = exec.ssh_args();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(&args[args.len() - 3..], &["-p", "2222", "ops@10.0.0.9"]);
    }

    #[test]
    fn test_password_auth_never_puts_secret_in_args() {
        let cred = Credential {
            username: "ops".into(),
            password: Some("hunter2".into()),
            port: 22,
            identity_file: None,
        };
        let exec = SshExecutor::from_credential("10.0.0.9", &cred);
        let args = exec.ssh_args();
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert!(args.iter().all(|a| !a.contains("hunter2")));
        assert!(exec.ssh_shell_prefix().starts_with("sshpass -e ssh"));
        assert!(!exec.ssh_shell_prefix().contains("hunter2"));
    }

    #[test]
    fn test_scp_uses_capital_port_flag() {
        let exec = SshExecutor::new("host", "me", 2200);
        let args = exec.scp_args(Path::new("/tmp/a.sh"), "/opt/a.sh");
        let pos = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[pos + 1], "2200");
        assert_eq!(args.last().unwrap(), "me@host:/opt/a.sh");
    }
}
