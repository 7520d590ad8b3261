pub mod env;
pub mod fleet;
pub mod locator;
pub mod parse;
pub mod plan_update;

pub use env::{NeighborEntry, NetworkEnv, SystemNetwork};
pub use fleet::{refresh_fleet, NodeRefresh, RefreshOutcome};
pub use locator::{DeviceLocator, IdentityRecord, LocatorConfig};
pub use plan_update::{update_plan, LocatorError};

#[cfg(test)]
mod testing;
