use std::path::PathBuf;

use armada_common::{InstallPhase, StoreError};
use armada_exec::ExecError;
use armada_planner::PlanValidationError;
use armada_registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("plan is not deployable: {0}")]
    InvalidPlan(#[from] PlanValidationError),
    #[error("phase {phase} failed on {node} ({service}): {reason}")]
    PhaseFailed {
        phase: InstallPhase,
        node: String,
        service: String,
        reason: String,
    },
    #[error("no {step} script for {unit} at {}", .path.display())]
    MissingScript {
        unit: String,
        step: &'static str,
        path: PathBuf,
    },
    #[error("failed to copy {} to {target}", .path.display())]
    Transfer { target: String, path: PathBuf },
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
