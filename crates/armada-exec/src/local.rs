use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;

use crate::executor::{output_from, CommandOutput, ExecError, RemoteExecutor};

/// Runs commands through the local `sh`.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// True when `name` (a file or directory name) matches one of the exclude
/// patterns. Patterns are exact names or `*suffix` / `prefix*` globs.
pub(crate) fn is_excluded(name: &str, excludes: &[String]) -> bool {
    excludes.iter().any(|pat| {
        if let Some(suffix) = pat.strip_prefix('*') {
            name.ends_with(suffix)
        } else if let Some(prefix) = pat.strip_suffix('*') {
            name.starts_with(prefix)
        } else {
            name == pat
        }
    })
}

async fn copy_tree(src: &Path, dst: &Path, excludes: &[String]) -> std::io::Result<u64> {
    let mut copied = 0;
    let mut stack: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if is_excluded(&name_str, excludes) {
                continue;
            }
            let file_type = entry.file_type().await?;
            let target = to.join(&name);
            if file_type.is_dir() {
                stack.push((entry.path(), target));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn target(&self) -> &str {
        "localhost"
    }

    async fn execute(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExecError> {
        tracing::debug!(%cmd, "executing locally");
        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(out)) => Ok(output_from(out)),
            Ok(Err(source)) => Err(ExecError::Spawn {
                program: "sh".to_string(),
                source,
            }),
            Err(_) => Err(ExecError::Timeout {
                target: self.target().to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }

    async fn transfer_file(&self, local: &Path, remote: &str) -> bool {
        let dest = Path::new(remote);
        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                tracing::warn!(error=%e, path=%parent.display(), "failed to create parent directory");
                return false;
            }
        }
        match fs::copy(local, dest).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error=%e, src=%local.display(), %remote, "local copy failed");
                false
            }
        }
    }

    async fn transfer_directory(&self, local: &Path, remote: &str, excludes: &[String]) -> bool {
        match copy_tree(local, Path::new(remote), excludes).await {
            Ok(files) => {
                tracing::debug!(files, src=%local.display(), %remote, "directory copied");
                true
            }
            Err(e) => {
                tracing::warn!(error=%e, src=%local.display(), %remote, "directory copy failed");
                false
            }
        }
    }

    async fn create_directory(&self, path: &str) -> bool {
        match fs::create_dir_all(path).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error=%e, %path, "failed to create directory");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_exit_code_and_streams() {
        let exec = LocalExecutor::new();
        let out = exec
            .execute("echo hello; echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let exec = LocalExecutor::new();
        let err = exec
            .execute("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_transfer_directory_honors_excludes() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub/.git")).unwrap();
        std::fs::write(src.path().join("keep.sh"), "x").unwrap();
        std::fs::write(src.path().join("drop.pyc"), "x").unwrap();
        std::fs::write(src.path().join("sub/inner.txt"), "x").unwrap();
        std::fs::write(src.path().join("sub/.git/HEAD"), "x").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("out");
        let ok = LocalExecutor::new()
            .transfer_directory(
                src.path(),
                target.to_str().unwrap(),
                &["*.pyc".to_string(), ".git".to_string()],
            )
            .await;
        assert!(ok);
        assert!(target.join("keep.sh").exists());
        assert!(target.join("sub/inner.txt").exists());
        assert!(!target.join("drop.pyc").exists());
        assert!(!target.join("sub/.git").exists());
    }

    #[test]
    fn test_is_excluded_patterns() {
        let ex = vec!["node_modules".to_string(), "*.log".to_string(), "tmp*".to_string()];
        assert!(is_excluded("node_modules", &ex));
        assert!(is_excluded("run.log", &ex));
        assert!(is_excluded("tmpdata", &ex));
        assert!(!is_excluded("src", &ex));
    }
}
