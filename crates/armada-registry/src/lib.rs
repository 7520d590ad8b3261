pub mod api;
pub mod health;
pub mod registry;
pub mod strategy;

pub use api::{router, ApiState};
pub use health::HealthProbe;
pub use registry::{
    KindSummary, RegistryDocument, RegistryError, SelectionRequirements, ServiceRegistry,
    REGISTRY_SCHEMA_VERSION,
};
pub use strategy::Strategy;
