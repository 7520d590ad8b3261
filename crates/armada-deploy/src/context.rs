use std::sync::Arc;

use armada_common::PlanStore;
use armada_exec::ExecutorFactory;
use armada_registry::ServiceRegistry;

use crate::config::DeployConfig;
use crate::installer::{ScriptInstaller, ServiceInstaller};

/// Everything a deployment run touches, passed explicitly.
#[derive(Clone)]
pub struct DeployContext {
    pub plan_store: PlanStore,
    pub registry: Arc<ServiceRegistry>,
    pub executors: Arc<dyn ExecutorFactory>,
    pub installer: Arc<dyn ServiceInstaller>,
    pub config: DeployConfig,
}

impl DeployContext {
    /// Uses the script installer configured by `config`.
    pub fn new(
        plan_store: PlanStore,
        registry: Arc<ServiceRegistry>,
        executors: Arc<dyn ExecutorFactory>,
        config: DeployConfig,
    ) -> Self {
        let installer = Arc::new(ScriptInstaller::new(&config));
        Self {
            plan_store,
            registry,
            executors,
            installer,
            config,
        }
    }

    pub fn with_installer(mut self, installer: Arc<dyn ServiceInstaller>) -> Self {
        self.installer = installer;
        self
    }
}
