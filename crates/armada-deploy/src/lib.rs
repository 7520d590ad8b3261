pub mod config;
pub mod context;
pub mod error;
pub mod installer;
pub mod orchestrator;
pub mod storage;

pub use config::{DeployConfig, StorageConfig};
pub use context::DeployContext;
pub use error::DeployError;
pub use installer::{InstallUnit, ScriptInstaller, ServiceInstaller, Step, StepEnv};
pub use orchestrator::{DeploySummary, NodeSummary, Orchestrator, ServiceSummary};
pub use storage::{setup_shared_storage, StorageMode};

#[cfg(test)]
mod testing;
