use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub enabled: bool,
    /// Directory exported over NFS by the coordinator.
    pub export_path: String,
    /// Where every other node mounts the export.
    pub mount_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_path: "/srv/armada/shared".to_string(),
            mount_path: "/mnt/armada".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Local directory holding one sub-directory of step scripts per unit.
    pub scripts_dir: PathBuf,
    /// Where the scripts are copied to on each node.
    pub remote_dir: String,
    pub tls_enabled: bool,
    pub dry_run: bool,
    /// Limit for install, configure and start steps.
    pub command_timeout: Duration,
    /// Limit for check steps and storage commands.
    pub check_timeout: Duration,
    pub storage: StorageConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            remote_dir: "/tmp/armada".to_string(),
            tls_enabled: false,
            dry_run: false,
            command_timeout: Duration::from_secs(900),
            check_timeout: Duration::from_secs(60),
            storage: StorageConfig::default(),
        }
    }
}
