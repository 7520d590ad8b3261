use std::net::IpAddr;

use serde::Serialize;

use armada_common::PlanStore;
use armada_exec::CredentialStore;

use crate::env::NetworkEnv;
use crate::locator::{DeviceLocator, IdentityRecord};
use crate::plan_update::{update_plan, LocatorError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Reachable,
    /// Identity verified at the recorded address, but its remote-access
    /// port did not answer.
    PortClosed,
    Relocated { new_address: String },
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRefresh {
    pub hostname: String,
    pub address: String,
    #[serde(flatten)]
    pub outcome: RefreshOutcome,
}

/// Check every plan node's remote-access port. Nodes that do not answer are
/// relocated; the plan file and (when given) the credential store follow
/// the new address.
pub async fn refresh_fleet<E: NetworkEnv>(
    locator: &DeviceLocator<E>,
    store: &PlanStore,
    mut credentials: Option<&mut CredentialStore>,
) -> Result<Vec<NodeRefresh>, LocatorError> {
    let plan = store.load()?;
    let timeout = locator.config().reach_timeout;
    let mut report = Vec::with_capacity(plan.nodes.len());

    for node in &plan.nodes {
        let device = &node.device;
        let port = device.remote_access.port;
        if locator.env().port_open(&device.address, port, timeout).await {
            tracing::debug!(hostname = %device.hostname, address = %device.address, "node reachable");
            report.push(NodeRefresh {
                hostname: device.hostname.clone(),
                address: device.address.clone(),
                outcome: RefreshOutcome::Reachable,
            });
            continue;
        }

        tracing::warn!(hostname = %device.hostname, address = %device.address, port, "node unreachable");
        let identity = IdentityRecord::from_profile(device);
        let outcome = match locator.relocate(&identity).await {
            Some(addr) if addr_eq(addr, &device.address) => {
                tracing::warn!(hostname = %device.hostname, address = %device.address, port, "address unchanged, remote access port closed");
                RefreshOutcome::PortClosed
            }
            Some(addr) => {
                let new_address = addr.to_string();
                update_plan(store, &device.address, &new_address)?;
                if let Some(creds) = credentials.as_deref_mut() {
                    creds
                        .rekey(&device.address, &new_address)
                        .map_err(|e| LocatorError::Credentials(format!("{e:#}")))?;
                }
                RefreshOutcome::Relocated { new_address }
            }
            None => RefreshOutcome::Lost,
        };
        report.push(NodeRefresh {
            hostname: device.hostname.clone(),
            address: device.address.clone(),
            outcome,
        });
    }
    Ok(report)
}

fn addr_eq(addr: IpAddr, recorded: &str) -> bool {
    recorded.parse::<IpAddr>().map(|r| r == addr).unwrap_or(false)
}
