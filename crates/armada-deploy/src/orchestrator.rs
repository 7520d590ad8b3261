use chrono::Utc;
use serde::Serialize;

use armada_common::{
    DeploymentPlan, DeviceProfile, HealthStatus, InstallPhase, NodeAssignment, Role, ServiceInstance,
    ServiceKind,
};
use armada_exec::RemoteExecutor;
use armada_planner::{assign, validate};

use crate::context::DeployContext;
use crate::error::DeployError;
use crate::installer::{InstallUnit, Step, StepEnv};
use crate::storage::{setup_shared_storage, StorageMode};

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub hostname: String,
    pub address: String,
    pub roles: Vec<Role>,
    pub storage: StorageMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub instance_id: String,
    pub service: ServiceKind,
    pub host: String,
    pub endpoint: String,
    pub health: HealthStatus,
    pub newly_deployed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploySummary {
    pub dry_run: bool,
    pub nodes: Vec<NodeSummary>,
    pub services: Vec<ServiceSummary>,
}

/// Brings a plan up, one phase at a time, one node at a time.
pub struct Orchestrator {
    ctx: DeployContext,
}

impl Orchestrator {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    /// The saved plan, validated.
    pub fn load_plan(&self) -> Result<DeploymentPlan, DeployError> {
        let plan = self.ctx.plan_store.load()?;
        validate(&plan)?;
        Ok(plan)
    }

    /// A fresh plan for already-profiled devices, validated.
    pub fn plan_devices(&self, devices: Vec<DeviceProfile>) -> Result<DeploymentPlan, DeployError> {
        let plan = assign(devices);
        validate(&plan)?;
        Ok(plan)
    }

    pub async fn run(&self, plan: DeploymentPlan) -> Result<DeploySummary, DeployError> {
        validate(&plan)?;
        let cfg = &self.ctx.config;
        tracing::info!(nodes = plan.nodes.len(), dry_run = cfg.dry_run, tls = cfg.tls_enabled, "deployment started");

        let storage = if plan.nodes.len() > 1 && !cfg.dry_run {
            setup_shared_storage(&plan, self.ctx.executors.as_ref(), &cfg.storage, cfg.check_timeout).await
        } else {
            vec![StorageMode::Local; plan.nodes.len()]
        };

        let coordinator_address = plan
            .coordinator_node()
            .map(|n| n.device.address.clone())
            .unwrap_or_default();
        let mut brought_up: Vec<String> = Vec::new();

        for phase in InstallPhase::ORDERED {
            tracing::info!(phase = %phase, "phase started");
            for (i, node) in plan.nodes.iter().enumerate() {
                let units = self.units_for(node, phase);
                if units.is_empty() {
                    continue;
                }
                let exec = self.ctx.executors.executor_for(&node.device);
                for unit in units {
                    let env = self.step_env(node, unit, &coordinator_address, storage[i]);
                    let preexisting = self.bring_up(exec.as_ref(), node, unit, &env).await?;
                    if let InstallUnit::Service(kind) = unit {
                        if !cfg.dry_run {
                            let id = self.register(exec.as_ref(), node, kind, preexisting)?;
                            brought_up.push(id);
                        }
                    }
                }
            }
        }

        if !cfg.dry_run {
            self.ctx.plan_store.save(&plan)?;
            tracing::info!(path = %self.ctx.plan_store.path().display(), "plan saved");
        }
        Ok(self.summary(&plan, &storage, &brought_up))
    }

    fn units_for(&self, node: &NodeAssignment, phase: InstallPhase) -> Vec<InstallUnit> {
        let mut units = Vec::new();
        match phase {
            InstallPhase::BasePackages => units.push(InstallUnit::Base),
            InstallPhase::Tls if self.ctx.config.tls_enabled && node.is_coordinator() => {
                units.push(InstallUnit::Tls)
            }
            _ => {}
        }
        units.extend(
            node.services
                .iter()
                .filter(|k| k.phase() == phase)
                .map(|k| InstallUnit::Service(*k)),
        );
        units
    }

    fn step_env(&self, node: &NodeAssignment, unit: InstallUnit, coordinator: &str, storage: StorageMode) -> StepEnv {
        let roles: Vec<&str> = node.roles.iter().map(|r| r.as_str()).collect();
        let mut env = StepEnv::default();
        env.set("ARMADA_UNIT", unit.name())
            .set("ARMADA_NODE_ADDRESS", node.device.address.as_str())
            .set("ARMADA_NODE_HOSTNAME", node.device.hostname.as_str())
            .set("ARMADA_ROLES", roles.join(","))
            .set("ARMADA_COORDINATOR_ADDRESS", coordinator)
            .set("ARMADA_STORAGE_MODE", storage.to_string());
        if let InstallUnit::Service(kind) = unit {
            env.set("ARMADA_SERVICE_PORT", kind.default_port().to_string());
        }
        if storage == StorageMode::Shared {
            let storage_cfg = &self.ctx.config.storage;
            let dir = if node.is_coordinator() {
                &storage_cfg.export_path
            } else {
                &storage_cfg.mount_path
            };
            env.set("ARMADA_SHARED_DIR", dir.as_str());
        }
        env
    }

    /// Returns whether the unit was already running.
    async fn bring_up(
        &self,
        exec: &dyn RemoteExecutor,
        node: &NodeAssignment,
        unit: InstallUnit,
        env: &StepEnv,
    ) -> Result<bool, DeployError> {
        let address = node.device.address.as_str();
        if self.ctx.config.dry_run {
            for step in Step::ALL {
                tracing::info!(node = address, unit = unit.name(), step = step.as_str(), "dry run: would run step");
            }
            return Ok(false);
        }

        let fail = |reason: String| DeployError::PhaseFailed {
            phase: unit.phase(),
            node: address.to_string(),
            service: unit.name().to_string(),
            reason,
        };
        let installer = self.ctx.installer.as_ref();

        let check = installer
            .run_step(exec, unit, Step::Check, env)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if check.success() {
            tracing::info!(node = address, unit = unit.name(), "already present, skipping install");
            return Ok(true);
        }

        for step in [Step::Install, Step::Configure, Step::Start] {
            let out = installer
                .run_step(exec, unit, step, env)
                .await
                .map_err(|e| fail(e.to_string()))?;
            if !out.success() {
                tracing::error!(node = address, unit = unit.name(), step = step.as_str(), exit_code = out.exit_code, "step failed");
                return Err(fail(format!(
                    "{} exited with {}: {}",
                    step.as_str(),
                    out.exit_code,
                    out.stderr.trim()
                )));
            }
        }

        let verify = installer
            .run_step(exec, unit, Step::Check, env)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !verify.success() {
            return Err(fail("not running after start".to_string()));
        }
        tracing::info!(node = address, unit = unit.name(), "unit installed");
        Ok(false)
    }

    fn register(
        &self,
        exec: &dyn RemoteExecutor,
        node: &NodeAssignment,
        kind: ServiceKind,
        preexisting: bool,
    ) -> Result<String, DeployError> {
        let mut instance = ServiceInstance::new(kind, node.device.address.as_str(), kind.default_port());
        instance.is_local = exec.target() == "localhost";
        instance.is_newly_deployed = !preexisting;
        instance.health_status = HealthStatus::Healthy;
        instance.last_health_check = Some(Utc::now());
        let id = instance.instance_id.clone();
        self.ctx.registry.register(instance)?;
        Ok(id)
    }

    fn summary(&self, plan: &DeploymentPlan, storage: &[StorageMode], brought_up: &[String]) -> DeploySummary {
        let nodes = plan
            .nodes
            .iter()
            .zip(storage)
            .map(|(n, s)| NodeSummary {
                hostname: n.device.hostname.clone(),
                address: n.device.address.clone(),
                roles: n.roles.iter().copied().collect(),
                storage: *s,
            })
            .collect();
        let services = brought_up
            .iter()
            .filter_map(|id| self.ctx.registry.get(id))
            .map(|s| ServiceSummary {
                endpoint: s.base_url(),
                instance_id: s.instance_id,
                service: s.service_type,
                host: s.host,
                health: s.health_status,
                newly_deployed: s.is_newly_deployed,
            })
            .collect();
        DeploySummary {
            dry_run: self.ctx.config.dry_run,
            nodes,
            services,
        }
    }
}
