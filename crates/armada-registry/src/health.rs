use async_trait::async_trait;

use armada_common::ServiceInstance;
use armada_discovery::{ProbeReport, ServiceProber};

/// Re-checks a registered instance. `None` means it did not answer as the
/// kind it is registered as.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, instance: &ServiceInstance) -> Option<ProbeReport>;
}

#[async_trait]
impl HealthProbe for ServiceProber {
    async fn check(&self, instance: &ServiceInstance) -> Option<ProbeReport> {
        self.inspect(&instance.host, instance.port, instance.service_type).await
    }
}
