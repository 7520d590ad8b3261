pub mod device;
pub mod error;
pub mod instance;
pub mod plan;
pub mod role;
pub mod score;
pub mod service;
pub mod util;

pub use device::{
    normalize_mac, CpuInfo, DeviceIdentity, DeviceProfile, DiskInfo, GpuInfo, GpuVendor,
    MemoryInfo, OsInfo, OsType, RemoteAccess,
};
pub use error::StoreError;
pub use instance::{clamp_load, HealthStatus, ServiceCapabilities, ServiceInstance};
pub use plan::{CoordinatorRef, DeploymentPlan, NodeAssignment, PlanDocument, PlanStore};
pub use role::Role;
pub use score::{meets_minimum, score};
pub use service::{InstallPhase, ProbeProtocol, ServiceCategory, ServiceKind};

pub mod telemetry;
