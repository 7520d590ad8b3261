use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use armada_common::util::write_json_atomic;
use armada_common::{clamp_load, HealthStatus, ServiceInstance, ServiceKind, StoreError};

use crate::health::HealthProbe;
use crate::strategy::Strategy;

pub const REGISTRY_SCHEMA_VERSION: u32 = 1;

fn default_registry_version() -> u32 {
    REGISTRY_SCHEMA_VERSION
}

/// On-disk registry file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryDocument {
    #[serde(default = "default_registry_version")]
    pub version: u32,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceInstance>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Filters applied before a strategy ranks candidates. Every set field must
/// be satisfied.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelectionRequirements {
    pub min_free_vram_mb: Option<u64>,
    pub model: Option<String>,
    pub max_load: Option<f64>,
    pub host: Option<String>,
}

impl SelectionRequirements {
    pub fn accepts(&self, instance: &ServiceInstance) -> bool {
        if let Some(min) = self.min_free_vram_mb {
            if instance.free_vram_mb() < min {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if !instance.capabilities.has_model(model) {
                return false;
            }
        }
        if let Some(max) = self.max_load {
            if instance.current_load > max {
                return false;
            }
        }
        if let Some(host) = &self.host {
            if &instance.host != host {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub total: usize,
    pub healthy: usize,
}

#[derive(Debug, Default)]
struct Inner {
    services: BTreeMap<String, ServiceInstance>,
    rr_counters: HashMap<ServiceKind, u64>,
}

/// Every known service instance, keyed by instance id.
///
/// All reads and writes go through one lock. With a backing file, every
/// mutation rewrites it atomically before the lock is released, and the
/// in-memory map only changes once that write has succeeded.
#[derive(Debug)]
pub struct ServiceRegistry {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl ServiceRegistry {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Load the registry from `path`, starting empty when the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let services = match fs::read(&path) {
            Ok(bytes) => {
                let doc: RegistryDocument =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::json(&path, e))?;
                if doc.version > REGISTRY_SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedVersion {
                        path,
                        found: doc.version,
                        supported: REGISTRY_SCHEMA_VERSION,
                    }
                    .into());
                }
                doc.services
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&path, e).into()),
        };
        tracing::info!(path = %path.display(), services = services.len(), "registry loaded");
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                services,
                rr_counters: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `edit` on a copy of the services, persist the copy, then swap it in.
    fn commit<R>(
        &self,
        inner: &mut Inner,
        edit: impl FnOnce(&mut BTreeMap<String, ServiceInstance>) -> R,
    ) -> Result<R, RegistryError> {
        let mut doc = RegistryDocument {
            version: REGISTRY_SCHEMA_VERSION,
            services: inner.services.clone(),
        };
        let out = edit(&mut doc.services);
        if let Some(path) = &self.path {
            write_json_atomic(path, &doc)?;
        }
        inner.services = doc.services;
        Ok(out)
    }

    /// Insert or replace by instance id.
    pub fn register(&self, mut instance: ServiceInstance) -> Result<(), RegistryError> {
        instance.current_load = clamp_load(instance.current_load);
        let mut inner = self.lock();
        let replaced = self.commit(&mut inner, |services| {
            services
                .insert(instance.instance_id.clone(), instance.clone())
                .is_some()
        })?;
        tracing::info!(
            instance_id = %instance.instance_id,
            service = %instance.service_type,
            replaced,
            "service registered"
        );
        Ok(())
    }

    /// Returns whether the id was present.
    pub fn unregister(&self, instance_id: &str) -> Result<bool, RegistryError> {
        let mut inner = self.lock();
        if !inner.services.contains_key(instance_id) {
            return Ok(false);
        }
        self.commit(&mut inner, |services| services.remove(instance_id))?;
        tracing::info!(instance_id, "service unregistered");
        Ok(true)
    }

    pub fn get(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.lock().services.get(instance_id).cloned()
    }

    pub fn list(&self) -> Vec<ServiceInstance> {
        self.lock().services.values().cloned().collect()
    }

    pub fn list_by_kind(&self, kind: ServiceKind) -> Vec<ServiceInstance> {
        self.lock()
            .services
            .values()
            .filter(|s| s.service_type == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update_load(&self, instance_id: &str, load: f64) -> Result<bool, RegistryError> {
        let mut inner = self.lock();
        self.commit(&mut inner, |services| match services.get_mut(instance_id) {
            Some(inst) => {
                inst.current_load = clamp_load(load);
                true
            }
            None => false,
        })
    }

    pub fn set_health(&self, instance_id: &str, status: HealthStatus) -> Result<bool, RegistryError> {
        let mut inner = self.lock();
        if !inner.services.contains_key(instance_id) {
            return Ok(false);
        }
        self.commit(&mut inner, |services| {
            if let Some(inst) = services.get_mut(instance_id) {
                inst.health_status = status;
            }
        })?;
        Ok(true)
    }

    /// Healthy and total counts per kind that has at least one instance.
    pub fn summary(&self) -> BTreeMap<ServiceKind, KindSummary> {
        let inner = self.lock();
        let mut out: BTreeMap<ServiceKind, KindSummary> = BTreeMap::new();
        for s in inner.services.values() {
            let entry = out.entry(s.service_type).or_default();
            entry.total += 1;
            if s.health_status == HealthStatus::Healthy {
                entry.healthy += 1;
            }
        }
        out
    }

    /// Pick one healthy instance of `kind` that meets `req`.
    pub fn select_instance(
        &self,
        kind: ServiceKind,
        req: &SelectionRequirements,
        strategy: Strategy,
    ) -> Option<ServiceInstance> {
        let mut inner = self.lock();
        let candidates: Vec<&ServiceInstance> = inner
            .services
            .values()
            .filter(|s| s.service_type == kind && s.health_status == HealthStatus::Healthy)
            .filter(|s| req.accepts(s))
            .collect();
        if candidates.is_empty() {
            tracing::debug!(service = %kind, "no instance meets selection requirements");
            return None;
        }

        let tick = if strategy == Strategy::RoundRobin {
            inner.rr_counters.get(&kind).copied().unwrap_or(0)
        } else {
            0
        };
        let chosen = strategy
            .select(&candidates, tick)
            .and_then(|i| candidates.get(i))
            .map(|s| (*s).clone());
        drop(candidates);

        if strategy == Strategy::RoundRobin {
            *inner.rr_counters.entry(kind).or_insert(0) += 1;
        }
        if let Some(s) = &chosen {
            tracing::debug!(service = %kind, strategy = %strategy, instance_id = %s.instance_id, "instance selected");
        }
        chosen
    }

    /// Re-probe every instance. Probes run without holding the lock; results
    /// are applied afterwards. Failed instances are marked unhealthy and kept.
    pub async fn health_check_all(&self, probe: &dyn HealthProbe) -> Result<HashMap<String, bool>, RegistryError> {
        let snapshot = self.list();
        let reports = join_all(snapshot.iter().map(|inst| probe.check(inst))).await;

        let now = Utc::now();
        let mut results = HashMap::with_capacity(snapshot.len());
        let mut inner = self.lock();
        self.commit(&mut inner, |services| {
            for (inst, report) in snapshot.iter().zip(reports) {
                results.insert(inst.instance_id.clone(), report.is_some());
                // Unregistered while probing.
                let Some(entry) = services.get_mut(&inst.instance_id) else {
                    continue;
                };
                entry.last_health_check = Some(now);
                match report {
                    Some(r) => {
                        entry.health_status = HealthStatus::Healthy;
                        entry.capabilities = r.capabilities;
                        entry.current_load = clamp_load(r.current_load);
                    }
                    None => {
                        if entry.health_status != HealthStatus::Unhealthy {
                            tracing::warn!(instance_id = %entry.instance_id, "health check failed");
                        }
                        entry.health_status = HealthStatus::Unhealthy;
                    }
                }
            }
        })?;
        let healthy = results.values().filter(|ok| **ok).count();
        tracing::info!(checked = results.len(), healthy, "health check finished");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_common::ServiceCapabilities;
    use armada_discovery::ProbeReport;
    use async_trait::async_trait;

    fn healthy(kind: ServiceKind, host: &str, port: u16) -> ServiceInstance {
        let mut s = ServiceInstance::new(kind, host, port);
        s.health_status = HealthStatus::Healthy;
        s
    }

    fn ollama(host: &str, models: &[&str], load: f64) -> ServiceInstance {
        let mut s = healthy(ServiceKind::Ollama, host, 11434);
        s.capabilities = ServiceCapabilities::with_models(models.iter().map(|m| m.to_string()).collect());
        s.current_load = load;
        s
    }

    #[test]
    fn test_capability_selection_prefers_richer_instance() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &["llama3:8b", "mistral", "phi3"], 0.2)).unwrap();
        reg.register(ollama("10.0.0.2", &["llama3:8b"], 0.9)).unwrap();

        let chosen = reg
            .select_instance(ServiceKind::Ollama, &SelectionRequirements::default(), Strategy::CapabilityBased)
            .unwrap();
        assert_eq!(chosen.host, "10.0.0.1");
    }

    #[test]
    fn test_register_twice_replaces() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &[], 0.1)).unwrap();
        reg.register(ollama("10.0.0.1", &["qwen2"], 0.6)).unwrap();

        assert_eq!(reg.len(), 1);
        let s = reg.get("ollama_10.0.0.1_11434").unwrap();
        assert_eq!(s.capabilities.model_count, 1);
        assert_eq!(s.current_load, 0.6);
    }

    #[test]
    fn test_unregistered_instance_is_never_selected() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &[], 0.1)).unwrap();
        assert!(reg.unregister("ollama_10.0.0.1_11434").unwrap());
        assert!(!reg.unregister("ollama_10.0.0.1_11434").unwrap());

        for strategy in [Strategy::RoundRobin, Strategy::LeastLoaded, Strategy::CapabilityBased] {
            assert!(reg
                .select_instance(ServiceKind::Ollama, &SelectionRequirements::default(), strategy)
                .is_none());
        }
    }

    #[test]
    fn test_round_robin_visits_each_once_per_cycle() {
        let reg = ServiceRegistry::in_memory();
        for i in 1..=3 {
            reg.register(ollama(&format!("10.0.0.{i}"), &[], 0.0)).unwrap();
        }
        let req = SelectionRequirements::default();
        let mut seen: Vec<String> = (0..3)
            .map(|_| reg.select_instance(ServiceKind::Ollama, &req, Strategy::RoundRobin).unwrap().host)
            .collect();
        seen.sort();
        assert_eq!(seen, ["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        let fourth = reg.select_instance(ServiceKind::Ollama, &req, Strategy::RoundRobin).unwrap();
        assert_eq!(fourth.host, "10.0.0.1");
    }

    #[test]
    fn test_requirements_filter_candidates() {
        let reg = ServiceRegistry::in_memory();
        let mut gpu = healthy(ServiceKind::ComfyUi, "10.0.0.1", 8188);
        gpu.capabilities.vram_free_mb = Some(20_000);
        gpu.current_load = 0.5;
        let mut small = healthy(ServiceKind::ComfyUi, "10.0.0.2", 8188);
        small.capabilities.vram_free_mb = Some(3_000);
        reg.register(gpu).unwrap();
        reg.register(small).unwrap();

        let need_vram = SelectionRequirements {
            min_free_vram_mb: Some(8_000),
            ..Default::default()
        };
        let s = reg.select_instance(ServiceKind::ComfyUi, &need_vram, Strategy::LeastLoaded).unwrap();
        assert_eq!(s.host, "10.0.0.1");

        let impossible = SelectionRequirements {
            min_free_vram_mb: Some(8_000),
            max_load: Some(0.2),
            ..Default::default()
        };
        assert!(reg.select_instance(ServiceKind::ComfyUi, &impossible, Strategy::LeastLoaded).is_none());

        let pinned = SelectionRequirements {
            host: Some("10.0.0.2".into()),
            ..Default::default()
        };
        assert_eq!(
            reg.select_instance(ServiceKind::ComfyUi, &pinned, Strategy::CapabilityBased).unwrap().host,
            "10.0.0.2"
        );
    }

    #[test]
    fn test_model_requirement_matches_untagged_name() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &["llama3:8b"], 0.0)).unwrap();
        let req = SelectionRequirements {
            model: Some("llama3".into()),
            ..Default::default()
        };
        assert!(reg.select_instance(ServiceKind::Ollama, &req, Strategy::LeastLoaded).is_some());
        let req = SelectionRequirements {
            model: Some("mistral".into()),
            ..Default::default()
        };
        assert!(reg.select_instance(ServiceKind::Ollama, &req, Strategy::LeastLoaded).is_none());
    }

    #[test]
    fn test_unhealthy_instances_are_skipped() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ServiceInstance::new(ServiceKind::Redis, "10.0.0.1", 6379)).unwrap();
        assert!(reg
            .select_instance(ServiceKind::Redis, &SelectionRequirements::default(), Strategy::LeastLoaded)
            .is_none());
        assert!(reg.set_health("redis_10.0.0.1_6379", HealthStatus::Healthy).unwrap());
        assert!(reg
            .select_instance(ServiceKind::Redis, &SelectionRequirements::default(), Strategy::LeastLoaded)
            .is_some());
    }

    #[test]
    fn test_update_load_clamps() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &[], 0.0)).unwrap();
        assert!(reg.update_load("ollama_10.0.0.1_11434", 4.0).unwrap());
        assert_eq!(reg.get("ollama_10.0.0.1_11434").unwrap().current_load, 1.0);
        assert!(!reg.update_load("missing", 0.5).unwrap());
    }

    #[test]
    fn test_persists_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let reg = ServiceRegistry::open(&path).unwrap();
            reg.register(ollama("10.0.0.1", &["llama3"], 0.3)).unwrap();
            reg.register(healthy(ServiceKind::Redis, "10.0.0.1", 6379)).unwrap();
            reg.unregister("redis_10.0.0.1_6379").unwrap();
        }
        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["services"]["ollama_10.0.0.1_11434"].is_object());

        let reloaded = ServiceRegistry::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.list()[0].capabilities.models, vec!["llama3".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("state");
        fs::create_dir(&parent).unwrap();
        let reg = ServiceRegistry::open(parent.join("registry.json")).unwrap();
        reg.register(ollama("10.0.0.1", &[], 0.1)).unwrap();

        fs::remove_dir_all(&parent).unwrap();
        fs::write(&parent, b"not a directory").unwrap();

        assert!(reg.register(healthy(ServiceKind::Redis, "10.0.0.1", 6379)).is_err());
        assert_eq!(reg.len(), 1);
        assert!(reg
            .select_instance(ServiceKind::Redis, &SelectionRequirements::default(), Strategy::LeastLoaded)
            .is_none());

        assert!(reg.unregister("ollama_10.0.0.1_11434").is_err());
        assert!(reg.update_load("ollama_10.0.0.1_11434", 0.9).is_err());
        assert!(reg.set_health("ollama_10.0.0.1_11434", HealthStatus::Unhealthy).is_err());
        let kept = reg.get("ollama_10.0.0.1_11434").unwrap();
        assert_eq!(kept.current_load, 0.1);
        assert_eq!(kept.health_status, HealthStatus::Healthy);

        assert!(reg.health_check_all(&FakeProbe { up: vec![] }).await.is_err());
        assert_eq!(reg.get("ollama_10.0.0.1_11434").unwrap().health_status, HealthStatus::Healthy);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, r#"{"version": 9, "services": {}}"#).unwrap();
        let err = ServiceRegistry::open(&path).unwrap_err();
        assert!(matches!(err, RegistryError::Store(StoreError::UnsupportedVersion { found: 9, .. })));
    }

    #[test]
    fn test_summary_counts() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ollama("10.0.0.1", &[], 0.0)).unwrap();
        reg.register(ServiceInstance::new(ServiceKind::Ollama, "10.0.0.2", 11434)).unwrap();
        let summary = reg.summary();
        assert_eq!(summary[&ServiceKind::Ollama], KindSummary { total: 2, healthy: 1 });
    }

    /// Answers only for hosts in `up`.
    struct FakeProbe {
        up: Vec<&'static str>,
    }

    #[async_trait]
    impl HealthProbe for FakeProbe {
        async fn check(&self, instance: &ServiceInstance) -> Option<ProbeReport> {
            self.up.contains(&instance.host.as_str()).then(|| ProbeReport {
                capabilities: ServiceCapabilities::with_models(vec!["fresh".into()]),
                current_load: 0.25,
            })
        }
    }

    #[tokio::test]
    async fn test_health_check_marks_and_refreshes() {
        let reg = ServiceRegistry::in_memory();
        reg.register(ServiceInstance::new(ServiceKind::Ollama, "10.0.0.1", 11434)).unwrap();
        reg.register(ollama("10.0.0.2", &["stale"], 0.0)).unwrap();

        let results = reg.health_check_all(&FakeProbe { up: vec!["10.0.0.1"] }).await.unwrap();
        assert_eq!(results["ollama_10.0.0.1_11434"], true);
        assert_eq!(results["ollama_10.0.0.2_11434"], false);

        let up = reg.get("ollama_10.0.0.1_11434").unwrap();
        assert_eq!(up.health_status, HealthStatus::Healthy);
        assert_eq!(up.capabilities.models, vec!["fresh".to_string()]);
        assert_eq!(up.current_load, 0.25);
        assert!(up.last_health_check.is_some());

        let down = reg.get("ollama_10.0.0.2_11434").unwrap();
        assert_eq!(down.health_status, HealthStatus::Unhealthy);
        assert_eq!(down.capabilities.models, vec!["stale".to_string()]);
    }
}
