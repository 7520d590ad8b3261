use armada_common::{DeploymentPlan, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanValidationError {
    #[error("plan has no nodes")]
    NoNodes,
    #[error("plan has no coordinator")]
    NoCoordinator,
    #[error("plan has {0} coordinators, expected exactly one")]
    MultipleCoordinators(usize),
    #[error("node {0} has no roles")]
    NodeWithoutRoles(String),
    #[error("node {0} is standalone but also holds other roles")]
    StandaloneWithOtherRoles(String),
    #[error("standalone role used in a {0}-node plan")]
    StandaloneInCluster(usize),
    #[error("no node holds the compute role")]
    NoCompute,
    #[error("coordinator reference points at node {index}, which is not a coordinator")]
    CoordinatorMismatch { index: usize },
}

/// Check the structural invariants of a plan. The first violation found is
/// returned.
pub fn validate(plan: &DeploymentPlan) -> Result<(), PlanValidationError> {
    if plan.nodes.is_empty() {
        return Err(PlanValidationError::NoNodes);
    }

    for node in &plan.nodes {
        if node.roles.is_empty() {
            return Err(PlanValidationError::NodeWithoutRoles(node.device.hostname.clone()));
        }
        if node.has_role(Role::Standalone) {
            if node.roles.len() > 1 {
                return Err(PlanValidationError::StandaloneWithOtherRoles(
                    node.device.hostname.clone(),
                ));
            }
            if plan.nodes.len() > 1 {
                return Err(PlanValidationError::StandaloneInCluster(plan.nodes.len()));
            }
        }
    }

    let coordinators = plan.nodes.iter().filter(|n| n.is_coordinator()).count();
    match coordinators {
        0 => return Err(PlanValidationError::NoCoordinator),
        1 => {}
        n => return Err(PlanValidationError::MultipleCoordinators(n)),
    }
    match plan.coordinator {
        Some(i) if plan.nodes.get(i).is_some_and(|n| n.is_coordinator()) => {}
        Some(index) => return Err(PlanValidationError::CoordinatorMismatch { index }),
        None => return Err(PlanValidationError::NoCoordinator),
    }

    if !plan.is_standalone() && plan.nodes_with_role(Role::Compute).next().is_none() {
        return Err(PlanValidationError::NoCompute);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::assign;
    use armada_common::{DeviceProfile, NodeAssignment};

    fn node(name: &str, roles: &[Role]) -> NodeAssignment {
        let mut n = NodeAssignment::new(DeviceProfile::new(name, name));
        n.roles.extend(roles.iter().copied());
        n
    }

    fn device(name: &str) -> DeviceProfile {
        let mut d = DeviceProfile::new(name, name);
        d.cpu.cores = 4;
        d.ram.total_gb = 16.0;
        d.disk.total_gb = 256.0;
        d
    }

    #[test]
    fn test_assigned_plans_validate() {
        assert_eq!(validate(&assign(vec![device("solo")])), Ok(()));
        assert_eq!(validate(&assign(vec![device("a"), device("b"), device("c")])), Ok(()));
    }

    #[test]
    fn test_empty_plan() {
        let plan = DeploymentPlan::new(vec![], None);
        assert_eq!(validate(&plan), Err(PlanValidationError::NoNodes));
    }

    #[test]
    fn test_coordinator_count() {
        let none = DeploymentPlan::new(vec![node("a", &[Role::Compute]), node("b", &[Role::Edge])], None);
        assert_eq!(validate(&none), Err(PlanValidationError::NoCoordinator));

        let two = DeploymentPlan::new(
            vec![
                node("a", &[Role::Coordinator, Role::Compute]),
                node("b", &[Role::Coordinator]),
            ],
            Some(0),
        );
        assert_eq!(validate(&two), Err(PlanValidationError::MultipleCoordinators(2)));
    }

    #[test]
    fn test_node_without_roles() {
        let plan = DeploymentPlan::new(
            vec![node("a", &[Role::Coordinator, Role::Compute]), node("b", &[])],
            Some(0),
        );
        assert_eq!(
            validate(&plan),
            Err(PlanValidationError::NodeWithoutRoles("b".into()))
        );
        assert_eq!(validate(&plan).unwrap_err().to_string(), "node b has no roles");
    }

    #[test]
    fn test_standalone_rules() {
        let mixed = DeploymentPlan::new(vec![node("a", &[Role::Standalone, Role::Compute])], Some(0));
        assert_eq!(
            validate(&mixed),
            Err(PlanValidationError::StandaloneWithOtherRoles("a".into()))
        );

        let cluster = DeploymentPlan::new(
            vec![node("a", &[Role::Standalone]), node("b", &[Role::Compute])],
            Some(0),
        );
        assert_eq!(validate(&cluster), Err(PlanValidationError::StandaloneInCluster(2)));
    }

    #[test]
    fn test_cluster_needs_compute() {
        let plan = DeploymentPlan::new(
            vec![node("a", &[Role::Coordinator, Role::Edge]), node("b", &[Role::Edge])],
            Some(0),
        );
        assert_eq!(validate(&plan), Err(PlanValidationError::NoCompute));
    }

    #[test]
    fn test_coordinator_index_must_match() {
        let plan = DeploymentPlan::new(
            vec![node("a", &[Role::Coordinator, Role::Compute]), node("b", &[Role::Edge])],
            Some(1),
        );
        assert_eq!(validate(&plan), Err(PlanValidationError::CoordinatorMismatch { index: 1 }));
    }
}
