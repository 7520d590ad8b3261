use std::fmt;
use std::time::Duration;

use serde::Serialize;

use armada_common::{DeploymentPlan, NodeAssignment};
use armada_exec::{shell_quote, ExecutorFactory, RemoteExecutor};

use crate::config::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// The coordinator's export is mounted and a write/read round trip passed.
    Shared,
    Local,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::Shared => "shared",
            StorageMode::Local => "local",
        })
    }
}

/// Export a directory from the coordinator over NFS and mount it on every
/// other node. Returns one mode per plan node, in plan order.
///
/// Failures never abort: a node whose mount or round trip fails is reported
/// as `Local`, and if the export itself fails every node is.
pub async fn setup_shared_storage(
    plan: &DeploymentPlan,
    executors: &dyn ExecutorFactory,
    config: &StorageConfig,
    timeout: Duration,
) -> Vec<StorageMode> {
    let mut modes = vec![StorageMode::Local; plan.nodes.len()];
    if !config.enabled || plan.nodes.len() < 2 {
        return modes;
    }
    let Some((coord_idx, coord)) = plan.coordinator.and_then(|i| plan.nodes.get(i).map(|n| (i, n))) else {
        return modes;
    };
    let coord_exec = executors.executor_for(&coord.device);

    if !export(coord_exec.as_ref(), config, timeout).await {
        tracing::warn!(
            coordinator = %coord.device.address,
            "shared storage export failed; every node uses local storage"
        );
        return modes;
    }
    modes[coord_idx] = StorageMode::Shared;

    for (i, node) in plan.nodes.iter().enumerate() {
        if i == coord_idx {
            continue;
        }
        let exec = executors.executor_for(&node.device);
        let ok = mount(exec.as_ref(), &coord.device.address, config, timeout).await
            && round_trip(exec.as_ref(), coord_exec.as_ref(), node, config, timeout).await;
        if ok {
            modes[i] = StorageMode::Shared;
            tracing::info!(node = %node.device.address, mount = %config.mount_path, "shared storage mounted");
        } else {
            tracing::warn!(node = %node.device.address, "shared storage unavailable; node degraded to local storage");
        }
    }
    modes
}

async fn run(exec: &dyn RemoteExecutor, cmd: &str, timeout: Duration) -> Option<String> {
    match exec.execute(cmd, timeout).await {
        Ok(out) if out.success() => Some(out.stdout.trim().to_string()),
        Ok(out) => {
            tracing::debug!(target_host = %exec.target(), cmd, exit_code = out.exit_code, stderr = %out.stderr.trim(), "storage command failed");
            None
        }
        Err(e) => {
            tracing::debug!(target_host = %exec.target(), cmd, error = %e, "storage command failed");
            None
        }
    }
}

async fn export(exec: &dyn RemoteExecutor, config: &StorageConfig, timeout: Duration) -> bool {
    let path = shell_quote(&config.export_path);
    let line = format!("{} *(rw,sync,no_subtree_check,no_root_squash)", config.export_path);
    let cmds = [
        format!("mkdir -p {path} && chmod 0777 {path}"),
        format!(
            "grep -qsF {} /etc/exports || echo {} >> /etc/exports",
            shell_quote(&format!("{} ", config.export_path)),
            shell_quote(&line)
        ),
        "exportfs -ra".to_string(),
    ];
    for cmd in &cmds {
        if run(exec, cmd, timeout).await.is_none() {
            return false;
        }
    }
    true
}

async fn mount(exec: &dyn RemoteExecutor, server: &str, config: &StorageConfig, timeout: Duration) -> bool {
    let mount_path = shell_quote(&config.mount_path);
    let source = shell_quote(&format!("{server}:{}", config.export_path));
    let cmd = format!(
        "mkdir -p {mount_path} && (mountpoint -q {mount_path} || mount -t nfs {source} {mount_path})"
    );
    run(exec, &cmd, timeout).await.is_some()
}

/// Write a random token through the node's mount and read it back from the
/// coordinator's export.
async fn round_trip(
    node_exec: &dyn RemoteExecutor,
    coord_exec: &dyn RemoteExecutor,
    node: &NodeAssignment,
    config: &StorageConfig,
    timeout: Duration,
) -> bool {
    let token = uuid::Uuid::new_v4().to_string();
    let file = format!(".armada-check-{}", node.device.hostname);
    let written = format!("{}/{file}", config.mount_path.trim_end_matches('/'));
    let exported = format!("{}/{file}", config.export_path.trim_end_matches('/'));

    let write = format!("printf '%s' {} > {}", shell_quote(&token), shell_quote(&written));
    if run(node_exec, &write, timeout).await.is_none() {
        return false;
    }
    let read = run(coord_exec, &format!("cat {}", shell_quote(&exported)), timeout).await;
    let _ = run(node_exec, &format!("rm -f {}", shell_quote(&written)), timeout).await;

    match read {
        Some(content) if content == token => true,
        other => {
            tracing::debug!(node = %node.device.address, read = ?other, "storage round trip mismatch");
            false
        }
    }
}
