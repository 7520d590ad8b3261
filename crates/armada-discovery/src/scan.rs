use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};

use armada_common::{ServiceInstance, ServiceKind};

use crate::probe::{ServiceProber, DEFAULT_PROBE_TIMEOUT};
use crate::range::AddressRange;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum probes in flight at once.
    pub concurrency: usize,
    /// Connect and request timeout for each probe.
    pub probe_timeout: Duration,
    /// Service kinds to look for; empty means all known kinds.
    pub kinds: Vec<ServiceKind>,
    /// Ports to probe instead of each kind's default and alternates.
    pub ports: Vec<u16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            kinds: Vec::new(),
            ports: Vec::new(),
        }
    }
}

impl ScanConfig {
    fn kinds(&self) -> Vec<ServiceKind> {
        if self.kinds.is_empty() {
            ServiceKind::ALL.to_vec()
        } else {
            self.kinds.clone()
        }
    }

    fn ports_for(&self, kind: ServiceKind) -> Vec<u16> {
        if self.ports.is_empty() {
            kind.scan_ports()
        } else {
            self.ports.clone()
        }
    }
}

/// Probe every (host, kind, port) combination in `range` and return the
/// services that answered, sorted by instance id.
///
/// A port that answers for more than one kind is reported once per kind that
/// positively identified itself; probes never guess. A host that is down or
/// refuses a port only loses that probe.
pub async fn scan(range: &AddressRange, config: &ScanConfig) -> Vec<ServiceInstance> {
    let prober = ServiceProber::new(config.probe_timeout);
    let kinds = config.kinds();
    let mut targets = Vec::new();
    for host in range.hosts() {
        for kind in &kinds {
            for port in config.ports_for(*kind) {
                targets.push((host.as_str(), *kind, port));
            }
        }
    }

    let started = Instant::now();
    let total = targets.len();
    tracing::info!(hosts = range.len(), probes = total, concurrency = config.concurrency, "service scan started");

    let mut found: Vec<ServiceInstance> = stream::iter(targets)
        .map(|(host, kind, port)| prober.probe(host, port, kind))
        .buffer_unordered(config.concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await;

    found.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    found.dedup_by(|a, b| a.instance_id == b.instance_id);

    tracing::info!(
        probes = total,
        found = found.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "service scan finished"
    );
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn serve_ollama(bind: &str) -> u16 {
        let app = Router::new().route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "llama3:8b"}]})) }),
        );
        let listener = tokio::net::TcpListener::bind(bind).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_scan_finds_only_answering_services() {
        let port = serve_ollama("127.0.0.1:0").await;

        let config = ScanConfig {
            concurrency: 4,
            probe_timeout: Duration::from_millis(500),
            kinds: vec![ServiceKind::Ollama, ServiceKind::ComfyUi, ServiceKind::Redis],
            ports: vec![port],
        };
        let range = AddressRange::from_hosts(["127.0.0.1"]);
        let found = scan(&range, &config).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_type, ServiceKind::Ollama);
        assert_eq!(found[0].port, port);
        assert_eq!(found[0].capabilities.model_count, 1);
    }

    #[tokio::test]
    async fn test_dead_hosts_do_not_stop_the_scan() {
        let port = serve_ollama("127.0.0.1:0").await;

        let config = ScanConfig {
            concurrency: 2,
            probe_timeout: Duration::from_millis(300),
            kinds: vec![ServiceKind::Ollama],
            ports: vec![port],
        };
        // 192.0.2.1 is TEST-NET-1 and never answers; 127.0.0.2 has nothing listening.
        let range = AddressRange::from_hosts(["192.0.2.1", "127.0.0.2", "127.0.0.1"]);
        let started = Instant::now();
        let found = scan(&range, &config).await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].host, "127.0.0.1");
        assert_eq!(found[0].port, port);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.kinds().len(), ServiceKind::ALL.len());
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.ports_for(ServiceKind::Ollama), ServiceKind::Ollama.scan_ports());
    }
}
