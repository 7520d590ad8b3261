use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceProfile;
use crate::error::StoreError;
use crate::role::Role;
use crate::service::ServiceKind;
use crate::util::write_bytes_atomic;

pub const PLAN_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeAssignment {
    pub device: DeviceProfile,
    pub roles: BTreeSet<Role>,
    pub services: BTreeSet<ServiceKind>,
}

impl NodeAssignment {
    pub fn new(device: DeviceProfile) -> Self {
        Self {
            device,
            roles: BTreeSet::new(),
            services: BTreeSet::new(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_coordinator(&self) -> bool {
        self.has_role(Role::Coordinator) || self.has_role(Role::Standalone)
    }
}

/// Reference to the Coordinator node as written in the plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorRef {
    pub hostname: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPlan {
    pub nodes: Vec<NodeAssignment>,
    /// Index into `nodes`.
    pub coordinator: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl DeploymentPlan {
    pub fn new(nodes: Vec<NodeAssignment>, coordinator: Option<usize>) -> Self {
        Self {
            nodes,
            coordinator,
            created_at: Utc::now(),
        }
    }

    pub fn coordinator_node(&self) -> Option<&NodeAssignment> {
        self.coordinator.and_then(|i| self.nodes.get(i))
    }

    pub fn is_standalone(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[0].has_role(Role::Standalone)
    }

    pub fn nodes_with_role(&self, role: Role) -> impl Iterator<Item = &NodeAssignment> {
        self.nodes.iter().filter(move |n| n.has_role(role))
    }

    pub fn nodes_with_service(&self, kind: ServiceKind) -> impl Iterator<Item = &NodeAssignment> {
        self.nodes.iter().filter(move |n| n.services.contains(&kind))
    }

    pub fn to_document(&self) -> PlanDocument {
        PlanDocument {
            version: PLAN_SCHEMA_VERSION,
            created_at: Some(self.created_at),
            node_count: self.nodes.len(),
            master_node: self.coordinator_node().map(|n| CoordinatorRef {
                hostname: n.device.hostname.clone(),
                address: n.device.address.clone(),
            }),
            nodes: self.nodes.clone(),
        }
    }

    pub fn from_document(doc: PlanDocument) -> Self {
        let by_ref = doc.master_node.as_ref().and_then(|m| {
            doc.nodes
                .iter()
                .position(|n| n.device.address == m.address && n.device.hostname == m.hostname)
                .or_else(|| doc.nodes.iter().position(|n| n.device.address == m.address))
        });
        let coordinator = by_ref.or_else(|| doc.nodes.iter().position(|n| n.is_coordinator()));
        Self {
            nodes: doc.nodes,
            coordinator,
            created_at: doc.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// On-disk plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDocument {
    #[serde(default = "default_plan_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub node_count: usize,
    #[serde(default)]
    pub master_node: Option<CoordinatorRef>,
    pub nodes: Vec<NodeAssignment>,
}

fn default_plan_version() -> u32 {
    PLAN_SCHEMA_VERSION
}

/// The plan file plus its timestamped backups.
#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
}

impl PlanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load_document(&self) -> Result<PlanDocument, StoreError> {
        let bytes = fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let doc: PlanDocument =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&self.path, e))?;
        if doc.version > PLAN_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                found: doc.version,
                supported: PLAN_SCHEMA_VERSION,
            });
        }
        Ok(doc)
    }

    pub fn load(&self) -> Result<DeploymentPlan, StoreError> {
        self.load_document().map(DeploymentPlan::from_document)
    }

    pub fn save_document(&self, doc: &PlanDocument) -> Result<(), StoreError> {
        let mut doc = doc.clone();
        doc.node_count = doc.nodes.len();
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::json(&self.path, e))?;
        write_bytes_atomic(&self.path, &bytes)
    }

    pub fn save(&self, plan: &DeploymentPlan) -> Result<(), StoreError> {
        self.save_document(&plan.to_document())
    }

    /// Copy the current file to `<file>.backup.<YYYYmmdd_HHMMSS>`. A second
    /// backup within the same second gets a numeric suffix instead of overwriting.
    pub fn backup(&self) -> Result<PathBuf, StoreError> {
        let ts = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let base = format!("{}.backup.{}", self.path.display(), ts);
        let mut target = PathBuf::from(&base);
        let mut n = 1;
        while target.exists() {
            target = PathBuf::from(format!("{base}.{n}"));
            n += 1;
        }
        fs::copy(&self.path, &target).map_err(|e| StoreError::io(&target, e))?;
        Ok(target)
    }
}
