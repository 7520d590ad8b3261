use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use armada_common::{
    clamp_load, HealthStatus, ProbeProtocol, ServiceCapabilities, ServiceInstance, ServiceKind,
};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Postgres SSLRequest: length 8, code 80877103.
const PG_SSL_REQUEST: [u8; 8] = [0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];

/// Result of parsing one introspection response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeReport {
    pub capabilities: ServiceCapabilities,
    pub current_load: f64,
}

/// Recognizes running services by their wire behaviour. Every failure mode
/// (refused, timed out, wrong protocol) is reported as absent.
#[derive(Debug, Clone)]
pub struct ServiceProber {
    http: reqwest::Client,
    timeout: Duration,
    local_hosts: HashSet<String>,
}

impl Default for ServiceProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl ServiceProber {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        let local_hosts = ["localhost", "127.0.0.1", "::1"]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            http,
            timeout,
            local_hosts,
        }
    }

    /// Mark `host` as this machine so instances found on it get `is_local`.
    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_hosts.insert(host.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one host/port for one kind of service.
    pub async fn probe(&self, host: &str, port: u16, kind: ServiceKind) -> Option<ServiceInstance> {
        let report = self.inspect(host, port, kind).await?;
        let mut inst = ServiceInstance::new(kind, host, port);
        inst.is_local = self.local_hosts.contains(host);
        inst.health_status = HealthStatus::Healthy;
        inst.capabilities = report.capabilities;
        inst.current_load = report.current_load;
        inst.last_health_check = Some(Utc::now());
        tracing::debug!(%host, port, service=%kind, "service found");
        Some(inst)
    }

    /// Protocol check without building an instance; used by health checks.
    pub async fn inspect(&self, host: &str, port: u16, kind: ServiceKind) -> Option<ProbeReport> {
        let stream = self.connect(host, port).await?;
        match kind.probe() {
            ProbeProtocol::Http {
                capabilities_path,
                stats_path,
            } => {
                drop(stream);
                self.inspect_http(host, port, kind, capabilities_path, stats_path)
                    .await
            }
            ProbeProtocol::RedisPing => self.inspect_redis(stream).await,
            ProbeProtocol::PostgresSsl => self.inspect_postgres(stream).await,
        }
    }

    async fn connect(&self, host: &str, port: u16) -> Option<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(s)) => Some(s),
            _ => None,
        }
    }

    async fn get_json(&self, url: &str) -> Option<Value> {
        let resp = self.http.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let text = resp.text().await.ok()?;
        // Plain-text health endpoints are fine; they just carry no metadata.
        Some(serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn inspect_http(
        &self,
        host: &str,
        port: u16,
        kind: ServiceKind,
        capabilities_path: &str,
        stats_path: Option<&str>,
    ) -> Option<ProbeReport> {
        let base = if host.contains(':') {
            format!("http://[{host}]:{port}")
        } else {
            format!("http://{host}:{port}")
        };
        let body = self.get_json(&format!("{base}{capabilities_path}")).await?;
        let mut report = parse_capabilities(kind, &body)?;

        if let Some(path) = stats_path {
            if let Some(stats) = self.get_json(&format!("{base}{path}")).await {
                apply_stats(kind, &stats, &mut report);
            }
        }
        Some(report)
    }

    async fn exchange(&self, mut stream: TcpStream, request: &[u8], max: usize) -> Option<Vec<u8>> {
        let io = async {
            stream.write_all(request).await?;
            let mut buf = vec![0u8; max];
            let n = stream.read(&mut buf).await?;
            buf.truncate(n);
            Ok::<_, std::io::Error>(buf)
        };
        match tokio::time::timeout(self.timeout, io).await {
            Ok(Ok(buf)) if !buf.is_empty() => Some(buf),
            _ => None,
        }
    }

    async fn inspect_redis(&self, stream: TcpStream) -> Option<ProbeReport> {
        let reply = self.exchange(stream, b"PING\r\n", 128).await?;
        let auth_required = if reply.starts_with(b"+PONG") {
            false
        } else if reply.starts_with(b"-NOAUTH") || reply.starts_with(b"-ERR operation not permitted") {
            true
        } else {
            return None;
        };
        let mut caps = ServiceCapabilities::default();
        caps.extra
            .insert("auth_required".into(), Value::Bool(auth_required));
        Some(ProbeReport {
            capabilities: caps,
            current_load: 0.0,
        })
    }

    async fn inspect_postgres(&self, stream: TcpStream) -> Option<ProbeReport> {
        let reply = self.exchange(stream, &PG_SSL_REQUEST, 1).await?;
        let ssl = match reply[0] {
            b'S' => true,
            b'N' => false,
            _ => return None,
        };
        let mut caps = ServiceCapabilities::default();
        caps.extra.insert("ssl".into(), Value::Bool(ssl));
        Some(ProbeReport {
            capabilities: caps,
            current_load: 0.0,
        })
    }
}

fn str_list(v: Option<&Value>, field: &str) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|m| match m {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => m
                        .get(field)
                        .or_else(|| m.get("model"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the "list capabilities" response. `None` means the response does not
/// look like `kind` at all.
pub fn parse_capabilities(kind: ServiceKind, body: &Value) -> Option<ProbeReport> {
    let capabilities = match kind {
        ServiceKind::Ollama => {
            let models = body.get("models")?;
            if !models.is_array() {
                return None;
            }
            ServiceCapabilities::with_models(str_list(Some(models), "name"))
        }
        ServiceKind::ComfyUi => {
            let nodes = body.as_object()?;
            if nodes.is_empty() {
                return None;
            }
            let checkpoints = body
                .pointer("/CheckpointLoaderSimple/input/required/ckpt_name/0")
                .cloned();
            let mut caps = ServiceCapabilities::with_models(str_list(checkpoints.as_ref(), "name"));
            caps.extra
                .insert("node_types".into(), Value::from(nodes.len() as u64));
            caps
        }
        ServiceKind::Tts => {
            let voices = match body {
                Value::Array(_) => str_list(Some(body), "name"),
                Value::Object(o) => match o.get("voices") {
                    Some(v) => str_list(Some(v), "name"),
                    None => o.keys().cloned().collect(),
                },
                _ => return None,
            };
            ServiceCapabilities::with_models(voices)
        }
        ServiceKind::OpenWebUi | ServiceKind::Backend | ServiceKind::Whisper => {
            if let Some(false) = body.get("status").and_then(Value::as_bool) {
                return None;
            }
            let mut caps = ServiceCapabilities::default();
            caps.version = body
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string);
            caps
        }
        ServiceKind::Postgres | ServiceKind::Redis => return None,
    };
    Some(ProbeReport {
        capabilities,
        current_load: 0.0,
    })
}

/// Fold the optional "system stats" response into the report.
pub fn apply_stats(kind: ServiceKind, stats: &Value, report: &mut ProbeReport) {
    match kind {
        ServiceKind::ComfyUi => {
            if let Some(version) = stats.pointer("/system/comfyui_version").and_then(Value::as_str) {
                report.capabilities.version = Some(version.to_string());
            }
            let Some(dev) = stats.pointer("/devices/0") else {
                return;
            };
            report.capabilities.device_name = dev.get("name").and_then(Value::as_str).map(str::to_string);
            let total = dev.get("vram_total").and_then(Value::as_u64);
            let free = dev.get("vram_free").and_then(Value::as_u64);
            report.capabilities.vram_total_mb = total.map(|b| b / (1024 * 1024));
            report.capabilities.vram_free_mb = free.map(|b| b / (1024 * 1024));
            if let (Some(total), Some(free)) = (total, free) {
                if total > 0 {
                    report.current_load = clamp_load(1.0 - free as f64 / total as f64);
                }
            }
        }
        ServiceKind::Ollama => {
            let Some(running) = stats.get("models").and_then(Value::as_array) else {
                return;
            };
            let vram_used: u64 = running
                .iter()
                .filter_map(|m| m.get("size_vram").and_then(Value::as_u64))
                .sum();
            if vram_used > 0 {
                report
                    .capabilities
                    .extra
                    .insert("vram_in_use_mb".into(), Value::from(vram_used / (1024 * 1024)));
            }
            let available = report.capabilities.model_count.max(1) as f64;
            report.current_load = clamp_load(running.len() as f64 / available);
        }
        ServiceKind::Backend => {
            let load = stats
                .get("load")
                .and_then(Value::as_f64)
                .or_else(|| stats.get("cpu_percent").and_then(Value::as_f64).map(|p| p / 100.0));
            if let Some(load) = load {
                report.current_load = clamp_load(load);
            }
        }
        _ => {}
    }
}
