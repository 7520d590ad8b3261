use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::ServiceKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-specific metadata parsed from a probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceCapabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    #[serde(default)]
    pub model_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_total_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_free_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceCapabilities {
    pub fn with_models(models: Vec<String>) -> Self {
        Self {
            model_count: models.len() as u32,
            models,
            ..Self::default()
        }
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.iter().any(|m| {
            m == name || m.split_once(':').map(|(base, _)| base == name).unwrap_or(false)
        })
    }
}

/// A live (or once-live) service endpoint tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_type: ServiceKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub is_local: bool,
    /// `false` for instances found already running, `true` for ones we installed.
    #[serde(default)]
    pub is_newly_deployed: bool,
    #[serde(default)]
    pub current_load: f64,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub capabilities: ServiceCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    pub fn instance_id_for(kind: ServiceKind, host: &str, port: u16) -> String {
        format!("{}_{}_{}", kind.as_str(), host, port)
    }

    pub fn new(kind: ServiceKind, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            instance_id: Self::instance_id_for(kind, &host, port),
            service_type: kind,
            host,
            port,
            is_local: false,
            is_newly_deployed: false,
            current_load: 0.0,
            health_status: HealthStatus::Unknown,
            capabilities: ServiceCapabilities::default(),
            last_health_check: None,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Free VRAM in MB as reported by the service, 0 when unknown.
    pub fn free_vram_mb(&self) -> u64 {
        self.capabilities.vram_free_mb.unwrap_or(0)
    }
}

pub fn clamp_load(load: f64) -> f64 {
    if load.is_finite() {
        load.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_is_type_host_port() {
        let inst = ServiceInstance::new(ServiceKind::Ollama, "10.0.0.4", 11435);
        assert_eq!(inst.instance_id, "ollama_10.0.0.4_11435");
        assert_eq!(inst.base_url(), "http://10.0.0.4:11435");
    }

    #[test]
    fn test_has_model_matches_untagged_name() {
        let caps = ServiceCapabilities::with_models(vec!["llama3:8b".into(), "qwen2".into()]);
        assert_eq!(caps.model_count, 2);
        assert!(caps.has_model("llama3"));
        assert!(caps.has_model("llama3:8b"));
        assert!(caps.has_model("qwen2"));
        assert!(!caps.has_model("mistral"));
    }

    #[test]
    fn test_clamp_load() {
        assert_eq!(clamp_load(1.7), 1.0);
        assert_eq!(clamp_load(-0.2), 0.0);
        assert_eq!(clamp_load(f64::NAN), 0.0);
        assert_eq!(clamp_load(0.25), 0.25);
    }
}
