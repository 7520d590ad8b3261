use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, or `None` when the command failed or printed nothing.
    pub fn stdout_if_ok(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (self.success() && !out.is_empty()).then_some(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command on {target} timed out after {secs}s")]
    Timeout { target: String, secs: u64 },
}

/// Runs commands and moves files on one machine, local or remote.
///
/// A non-zero exit code is a normal `Ok` result; only a failure to run the
/// command at all (spawn error, timeout) is an `Err`.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Address or name of the machine this executor drives, for logging.
    fn target(&self) -> &str;

    async fn execute(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError>;

    async fn transfer_file(&self, local: &Path, remote: &str) -> bool;

    async fn transfer_directory(&self, local: &Path, remote: &str, excludes: &[String]) -> bool;

    async fn create_directory(&self, path: &str) -> bool;

    /// Convenience: run and return trimmed stdout only on success.
    async fn capture(&self, cmd: &str, timeout: Duration) -> Option<String> {
        match self.execute(cmd, timeout).await {
            Ok(out) => out.stdout_if_ok().map(str::to_string),
            Err(e) => {
                tracing::debug!(target_host = %self.target(), error = %e, "capture failed");
                None
            }
        }
    }
}

/// Quote `s` for POSIX `sh`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub(crate) fn output_from(out: std::process::Output) -> CommandOutput {
    CommandOutput {
        exit_code: out.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    }
}
