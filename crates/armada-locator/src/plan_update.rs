use armada_common::{PlanStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to update credential store: {0}")]
    Credentials(String),
}

/// Rewrite every reference to `old` in the plan file to `new`: node device
/// addresses and the coordinator reference. The file is backed up first.
///
/// Returns `false` without touching the file (or creating a backup) when
/// nothing refers to `old`.
pub fn update_plan(store: &PlanStore, old: &str, new: &str) -> Result<bool, LocatorError> {
    let mut doc = store.load_document()?;

    let node_hits = doc.nodes.iter().filter(|n| n.device.address == old).count();
    let master_hit = doc.master_node.as_ref().is_some_and(|m| m.address == old);
    if node_hits == 0 && !master_hit {
        tracing::debug!(old, "no plan record refers to this address");
        return Ok(false);
    }

    let backup = store.backup()?;
    tracing::info!(backup = %backup.display(), "plan backed up");

    for node in doc.nodes.iter_mut().filter(|n| n.device.address == old) {
        node.device.address = new.to_string();
    }
    if let Some(master) = doc.master_node.as_mut().filter(|m| m.address == old) {
        master.address = new.to_string();
    }
    store.save_document(&doc)?;
    tracing::info!(old, new, nodes = node_hits, coordinator = master_hit, "plan addresses rewritten");
    Ok(true)
}
