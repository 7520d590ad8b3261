//! Role and service assignment.
//!
//! Multi-device planning is a fixed sequence of pure passes over an
//! [`AssignmentSet`]. Later passes depend on earlier ones (the front-end
//! placement looks at which nodes already carry services), so the order in
//! [`PASSES`] is part of the contract.

use armada_common::{
    meets_minimum, DeploymentPlan, DeviceProfile, NodeAssignment, Role, ServiceCategory, ServiceKind,
};

pub const COMPUTE_MIN_VRAM_GB: f64 = 6.0;
pub const STORAGE_MIN_DISK_GB: f64 = 500.0;
pub const INFERENCE_MIN_RAM_GB: f64 = 8.0;
pub const GENERATIVE_MIN_VRAM_GB: f64 = 4.0;
pub const PROCESSING_MIN_CORES: u32 = 4;

/// Nodes in descending score order, plus the Coordinator once chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSet {
    pub nodes: Vec<NodeAssignment>,
    pub coordinator: Option<usize>,
}

impl AssignmentSet {
    /// Stable sort by descending capability score; ties keep input order.
    pub fn ranked(devices: Vec<DeviceProfile>) -> Self {
        let mut nodes: Vec<NodeAssignment> = devices.into_iter().map(NodeAssignment::new).collect();
        nodes.sort_by(|a, b| b.device.capability_score().total_cmp(&a.device.capability_score()));
        Self {
            nodes,
            coordinator: None,
        }
    }

    fn coordinator_mut(&mut self) -> Option<&mut NodeAssignment> {
        self.coordinator.and_then(|i| self.nodes.get_mut(i))
    }

    fn coordinator_name(&self) -> &str {
        self.coordinator
            .and_then(|i| self.nodes.get(i))
            .map(|n| n.device.hostname.as_str())
            .unwrap_or("<none>")
    }

    fn into_plan(self) -> DeploymentPlan {
        DeploymentPlan::new(self.nodes, self.coordinator)
    }
}

pub type Pass = fn(AssignmentSet) -> AssignmentSet;

pub const PASSES: [(&str, Pass); 6] = [
    ("coordinator", assign_coordinator),
    ("compute", assign_compute),
    ("storage", assign_storage),
    ("edge", assign_edge),
    ("services", assign_services),
    ("os_filter", filter_unsupported_services),
];

/// Build a plan for `devices` (in discovery order).
///
/// A single device becomes a Standalone node running the whole catalog.
/// Minimum-requirement checks are advisory: shortfalls are logged, never fatal.
pub fn assign(devices: Vec<DeviceProfile>) -> DeploymentPlan {
    for d in &devices {
        if !meets_minimum(d) {
            tracing::warn!(
                hostname = %d.hostname,
                cores = d.cpu.cores,
                ram_gb = d.ram.total_gb,
                disk_gb = d.disk.total_gb,
                "device is below recommended minimum, continuing"
            );
        }
    }

    match devices.len() {
        0 => DeploymentPlan::new(Vec::new(), None),
        1 => assign_standalone(devices),
        _ => {
            let mut set = AssignmentSet::ranked(devices);
            for (name, pass) in PASSES {
                set = pass(set);
                tracing::debug!(pass = name, "assignment pass done");
            }
            set.into_plan()
        }
    }
}

fn assign_standalone(devices: Vec<DeviceProfile>) -> DeploymentPlan {
    let mut set = AssignmentSet::ranked(devices);
    set.coordinator = Some(0);
    if let Some(node) = set.nodes.first_mut() {
        node.roles.insert(Role::Standalone);
        node.services.extend(ServiceKind::ALL);
        tracing::info!(hostname = %node.device.hostname, "single device, standalone deployment");
    }
    filter_unsupported_services(set).into_plan()
}

pub fn assign_coordinator(mut set: AssignmentSet) -> AssignmentSet {
    if let Some(first) = set.nodes.first_mut() {
        first.roles.insert(Role::Coordinator);
        set.coordinator = Some(0);
        tracing::info!(
            hostname = %first.device.hostname,
            score = first.device.capability_score(),
            "coordinator selected"
        );
    }
    set
}

pub fn assign_compute(mut set: AssignmentSet) -> AssignmentSet {
    let mut any = false;
    for node in &mut set.nodes {
        if node.device.has_accelerator() && node.device.gpu.vram_total_gb >= COMPUTE_MIN_VRAM_GB {
            node.roles.insert(Role::Compute);
            any = true;
        }
    }
    if !any {
        tracing::warn!(
            coordinator = %set.coordinator_name(),
            min_vram_gb = COMPUTE_MIN_VRAM_GB,
            "no device qualifies for compute, assigning compute to coordinator"
        );
        if let Some(c) = set.coordinator_mut() {
            c.roles.insert(Role::Compute);
        }
    }
    set
}

pub fn assign_storage(mut set: AssignmentSet) -> AssignmentSet {
    let mut any = false;
    for node in &mut set.nodes {
        if node.device.disk.total_gb >= STORAGE_MIN_DISK_GB {
            node.roles.insert(Role::Storage);
            any = true;
        }
    }
    if !any {
        tracing::warn!(
            coordinator = %set.coordinator_name(),
            min_disk_gb = STORAGE_MIN_DISK_GB,
            "no device qualifies for storage, assigning storage to coordinator"
        );
        if let Some(c) = set.coordinator_mut() {
            c.roles.insert(Role::Storage);
        }
    }
    set
}

pub fn assign_edge(mut set: AssignmentSet) -> AssignmentSet {
    for node in &mut set.nodes {
        node.roles.insert(Role::Edge);
    }
    set
}

fn kinds_in(category: ServiceCategory) -> impl Iterator<Item = ServiceKind> {
    ServiceKind::ALL.into_iter().filter(move |k| k.category() == category)
}

fn place_where(set: &mut AssignmentSet, category: ServiceCategory, fits: impl Fn(&DeviceProfile) -> bool) {
    let mut placed = 0usize;
    for node in &mut set.nodes {
        if fits(&node.device) {
            node.services.extend(kinds_in(category));
            placed += 1;
        }
    }
    if placed == 0 {
        tracing::warn!(category = ?category, "no device qualifies, services left unassigned");
    } else {
        tracing::info!(category = ?category, nodes = placed, "services placed");
    }
}

/// Service mapping. Independent of roles except for the Coordinator, which
/// receives every core service.
pub fn assign_services(mut set: AssignmentSet) -> AssignmentSet {
    if let Some(c) = set.coordinator_mut() {
        c.services.extend(kinds_in(ServiceCategory::Core));
    }

    place_where(&mut set, ServiceCategory::Inference, |d| d.ram.total_gb >= INFERENCE_MIN_RAM_GB);
    place_where(&mut set, ServiceCategory::Generative, |d| {
        d.has_accelerator() && d.gpu.vram_total_gb >= GENERATIVE_MIN_VRAM_GB
    });
    place_where(&mut set, ServiceCategory::Processing, |d| {
        d.cpu.cores >= PROCESSING_MIN_CORES || d.has_accelerator()
    });

    // Front-end goes last: only a node left idle after the OS filter, and able
    // to run the front-end itself, takes it.
    let idle = set.nodes.iter().position(|n| {
        let os = n.device.os.os_type;
        kinds_in(ServiceCategory::FrontEnd).all(|k| k.supports_os(os))
            && n.services.iter().all(|k| !k.supports_os(os))
    });
    match idle {
        Some(i) => {
            let node = &mut set.nodes[i];
            node.services.extend(kinds_in(ServiceCategory::FrontEnd));
            tracing::info!(hostname = %node.device.hostname, "front-end placed on idle node");
        }
        None => {
            tracing::warn!(
                coordinator = %set.coordinator_name(),
                "no idle node for front-end, placing on coordinator"
            );
            if let Some(c) = set.coordinator_mut() {
                c.services.extend(kinds_in(ServiceCategory::FrontEnd));
            }
        }
    }
    set
}

pub fn filter_unsupported_services(mut set: AssignmentSet) -> AssignmentSet {
    for node in &mut set.nodes {
        let os = node.device.os.os_type;
        let hostname = &node.device.hostname;
        node.services.retain(|kind| {
            let ok = kind.supports_os(os);
            if !ok {
                tracing::warn!(hostname = %hostname, service = %kind, os = ?os, "service not supported on this OS, dropped");
            }
            ok
        });
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_common::{GpuVendor, OsType};
    use std::collections::BTreeSet;

    fn device(name: &str, ram: f64, vram: f64, disk: f64, cores: u32) -> DeviceProfile {
        let mut d = DeviceProfile::new(name, name);
        d.ram.total_gb = ram;
        d.disk.total_gb = disk;
        d.cpu.cores = cores;
        d.os.os_type = OsType::Linux;
        if vram > 0.0 {
            d.gpu.vendor = GpuVendor::Nvidia;
            d.gpu.count = 1;
            d.gpu.vram_total_gb = vram;
        }
        d
    }

    fn hosts<'a>(plan: &'a DeploymentPlan, pred: impl Fn(&NodeAssignment) -> bool) -> BTreeSet<&'a str> {
        plan.nodes
            .iter()
            .filter(|n| pred(n))
            .map(|n| n.device.hostname.as_str())
            .collect()
    }

    #[test]
    fn test_three_device_cluster() {
        let plan = assign(vec![
            device("dev1", 64.0, 24.0, 200.0, 8),
            device("dev2", 32.0, 12.0, 200.0, 8),
            device("dev3", 16.0, 0.0, 2000.0, 8),
        ]);

        assert_eq!(plan.coordinator_node().unwrap().device.hostname, "dev1");
        assert_eq!(hosts(&plan, |n| n.has_role(Role::Coordinator)), BTreeSet::from(["dev1"]));
        assert_eq!(hosts(&plan, |n| n.has_role(Role::Compute)), BTreeSet::from(["dev1", "dev2"]));
        assert_eq!(hosts(&plan, |n| n.has_role(Role::Storage)), BTreeSet::from(["dev3"]));
        assert_eq!(hosts(&plan, |n| n.has_role(Role::Edge)).len(), 3);
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::Ollama)),
            BTreeSet::from(["dev1", "dev2", "dev3"])
        );
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::ComfyUi)),
            BTreeSet::from(["dev1", "dev2"])
        );
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::Postgres)),
            BTreeSet::from(["dev1"])
        );
        // Every node already runs something, so the front-end falls back.
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::OpenWebUi)),
            BTreeSet::from(["dev1"])
        );
    }

    #[test]
    fn test_single_small_device_is_standalone_with_full_catalog() {
        let d = device("tiny", 4.0, 0.0, 100.0, 2);
        assert!(meets_minimum(&d));
        let plan = assign(vec![d]);

        assert_eq!(plan.nodes.len(), 1);
        assert!(plan.is_standalone());
        assert_eq!(plan.nodes[0].roles, BTreeSet::from([Role::Standalone]));
        assert_eq!(plan.nodes[0].services, ServiceKind::ALL.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_standalone_below_minimum_still_gets_everything() {
        let plan = assign(vec![device("weak", 1.0, 0.0, 10.0, 1)]);
        assert!(plan.is_standalone());
        assert_eq!(plan.nodes[0].services.len(), ServiceKind::ALL.len());
    }

    #[test]
    fn test_fallbacks_land_on_coordinator() {
        let plan = assign(vec![
            device("a", 16.0, 0.0, 200.0, 8),
            device("b", 8.0, 0.0, 200.0, 2),
        ]);
        let coord = plan.coordinator_node().unwrap();
        assert_eq!(coord.device.hostname, "a");
        assert!(coord.has_role(Role::Compute));
        assert!(coord.has_role(Role::Storage));
        assert_eq!(plan.nodes_with_role(Role::Compute).count(), 1);
    }

    #[test]
    fn test_front_end_goes_to_first_idle_node() {
        // c and d have too little RAM and too few cores for anything.
        let plan = assign(vec![
            device("a", 32.0, 0.0, 200.0, 8),
            device("c", 4.0, 0.0, 200.0, 2),
            device("d", 2.0, 0.0, 200.0, 2),
        ]);
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::OpenWebUi)),
            BTreeSet::from(["c"])
        );
    }

    #[test]
    fn test_os_filter_drops_unsupported_services() {
        let mut win = device("win", 64.0, 24.0, 1000.0, 16);
        win.os.os_type = OsType::Windows;
        let plan = assign(vec![win, device("lin", 8.0, 0.0, 200.0, 4)]);

        let coord = plan.coordinator_node().unwrap();
        assert_eq!(coord.device.hostname, "win");
        assert!(!coord.services.contains(&ServiceKind::Postgres));
        assert!(coord.services.contains(&ServiceKind::Ollama));
        assert!(coord.services.contains(&ServiceKind::ComfyUi));
    }

    #[test]
    fn test_front_end_skips_idle_node_that_cannot_run_it() {
        let mut win = device("win", 4.0, 0.0, 100.0, 2);
        win.os.os_type = OsType::Windows;
        let plan = assign(vec![device("lin", 32.0, 12.0, 200.0, 8), win]);

        let coord = plan.coordinator_node().unwrap();
        assert_eq!(coord.device.hostname, "lin");
        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::OpenWebUi)),
            BTreeSet::from(["lin"])
        );
        for kind in kinds_in(ServiceCategory::Core) {
            assert!(coord.services.contains(&kind), "coordinator missing {kind}");
        }
        assert!(plan.nodes[1].services.is_empty());
    }

    #[test]
    fn test_front_end_lands_on_idle_node_behind_filtered_windows_node() {
        // win only qualifies for processing services, which Windows drops.
        let mut win = device("win", 4.0, 0.0, 100.0, 4);
        win.os.os_type = OsType::Windows;
        let mut mac = device("mac", 2.0, 0.0, 100.0, 2);
        mac.os.os_type = OsType::Macos;
        let plan = assign(vec![device("lin", 32.0, 12.0, 200.0, 8), win, mac]);

        assert_eq!(
            hosts(&plan, |n| n.services.contains(&ServiceKind::OpenWebUi)),
            BTreeSet::from(["mac"])
        );
        assert!(hosts(&plan, |n| n.services.contains(&ServiceKind::Whisper)).contains("lin"));
        assert!(!hosts(&plan, |n| !n.services.is_empty()).contains("win"));
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let plan = assign(vec![
            device("first", 16.0, 0.0, 200.0, 4),
            device("second", 16.0, 0.0, 200.0, 4),
        ]);
        assert_eq!(plan.nodes[0].device.hostname, "first");
        assert_eq!(plan.coordinator, Some(0));
    }

    #[test]
    fn test_assign_is_deterministic() {
        let devices = vec![
            device("x", 32.0, 8.0, 600.0, 8),
            device("y", 32.0, 8.0, 600.0, 8),
            device("z", 64.0, 0.0, 100.0, 4),
        ];
        let a = assign(devices.clone());
        let b = assign(devices);
        assert_eq!(
            serde_json::to_value(&a.nodes).unwrap(),
            serde_json::to_value(&b.nodes).unwrap()
        );
        assert_eq!(a.coordinator, b.coordinator);
    }

    #[test]
    fn test_passes_run_in_fixed_order() {
        let names: Vec<&str> = PASSES.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["coordinator", "compute", "storage", "edge", "services", "os_filter"]);
    }
}
