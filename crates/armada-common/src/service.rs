use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::device::OsType;

/// Every service the stack knows how to discover, place and install.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "redis")]
    Redis,
    #[serde(rename = "backend")]
    Backend,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "comfyui")]
    ComfyUi,
    #[serde(rename = "whisper")]
    Whisper,
    #[serde(rename = "tts")]
    Tts,
    #[serde(rename = "open-webui")]
    OpenWebUi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    /// System-of-record and central API; Coordinator only.
    Core,
    /// LLM inference, placed by RAM.
    Inference,
    /// GPU-bound image generation, placed by VRAM.
    Generative,
    /// CPU-bound audio processing.
    Processing,
    /// User-facing web front-end.
    FrontEnd,
}

/// Install phases in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    BasePackages,
    DataLayer,
    Compute,
    Tls,
    Application,
}

impl InstallPhase {
    pub const ORDERED: [InstallPhase; 5] = [
        InstallPhase::BasePackages,
        InstallPhase::DataLayer,
        InstallPhase::Compute,
        InstallPhase::Tls,
        InstallPhase::Application,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstallPhase::BasePackages => "base_packages",
            InstallPhase::DataLayer => "data_layer",
            InstallPhase::Compute => "compute",
            InstallPhase::Tls => "tls",
            InstallPhase::Application => "application",
        }
    }
}

impl std::fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How discovery recognizes a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeProtocol {
    /// `capabilities_path` must answer 2xx; `stats_path` is fetched best-effort.
    Http {
        capabilities_path: &'static str,
        stats_path: Option<&'static str>,
    },
    /// Send `PING`, expect `+PONG`.
    RedisPing,
    /// Send an SSLRequest, expect a single `S` or `N`.
    PostgresSsl,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::Postgres,
        ServiceKind::Redis,
        ServiceKind::Backend,
        ServiceKind::Ollama,
        ServiceKind::ComfyUi,
        ServiceKind::Whisper,
        ServiceKind::Tts,
        ServiceKind::OpenWebUi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Postgres => "postgres",
            ServiceKind::Redis => "redis",
            ServiceKind::Backend => "backend",
            ServiceKind::Ollama => "ollama",
            ServiceKind::ComfyUi => "comfyui",
            ServiceKind::Whisper => "whisper",
            ServiceKind::Tts => "tts",
            ServiceKind::OpenWebUi => "open-webui",
        }
    }

    pub fn category(self) -> ServiceCategory {
        match self {
            ServiceKind::Postgres | ServiceKind::Redis | ServiceKind::Backend => {
                ServiceCategory::Core
            }
            ServiceKind::Ollama => ServiceCategory::Inference,
            ServiceKind::ComfyUi => ServiceCategory::Generative,
            ServiceKind::Whisper | ServiceKind::Tts => ServiceCategory::Processing,
            ServiceKind::OpenWebUi => ServiceCategory::FrontEnd,
        }
    }

    pub fn phase(self) -> InstallPhase {
        match self {
            ServiceKind::Postgres | ServiceKind::Redis => InstallPhase::DataLayer,
            ServiceKind::Ollama | ServiceKind::ComfyUi | ServiceKind::Whisper | ServiceKind::Tts => {
                InstallPhase::Compute
            }
            ServiceKind::Backend | ServiceKind::OpenWebUi => InstallPhase::Application,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServiceKind::Postgres => 5432,
            ServiceKind::Redis => 6379,
            ServiceKind::Backend => 8000,
            ServiceKind::Ollama => 11434,
            ServiceKind::ComfyUi => 8188,
            ServiceKind::Whisper => 9000,
            ServiceKind::Tts => 5002,
            ServiceKind::OpenWebUi => 3000,
        }
    }

    /// Extra ports used when several instances share one host.
    pub fn alternate_ports(self) -> &'static [u16] {
        match self {
            ServiceKind::Ollama => &[11435, 11436, 11437],
            ServiceKind::ComfyUi => &[8189, 8190],
            _ => &[],
        }
    }

    /// Default port followed by the alternates.
    pub fn scan_ports(self) -> Vec<u16> {
        let mut ports = vec![self.default_port()];
        ports.extend_from_slice(self.alternate_ports());
        ports
    }

    pub fn probe(self) -> ProbeProtocol {
        match self {
            ServiceKind::Postgres => ProbeProtocol::PostgresSsl,
            ServiceKind::Redis => ProbeProtocol::RedisPing,
            ServiceKind::Backend => ProbeProtocol::Http {
                capabilities_path: "/health",
                stats_path: Some("/api/system/stats"),
            },
            ServiceKind::Ollama => ProbeProtocol::Http {
                capabilities_path: "/api/tags",
                stats_path: Some("/api/ps"),
            },
            ServiceKind::ComfyUi => ProbeProtocol::Http {
                capabilities_path: "/object_info",
                stats_path: Some("/system_stats"),
            },
            ServiceKind::Whisper => ProbeProtocol::Http {
                capabilities_path: "/health",
                stats_path: None,
            },
            ServiceKind::Tts => ProbeProtocol::Http {
                capabilities_path: "/api/voices",
                stats_path: None,
            },
            ServiceKind::OpenWebUi => ProbeProtocol::Http {
                capabilities_path: "/health",
                stats_path: None,
            },
        }
    }

    pub fn supports_os(self, os: OsType) -> bool {
        match self {
            ServiceKind::Ollama | ServiceKind::ComfyUi => true,
            _ => matches!(os, OsType::Linux | OsType::Macos | OsType::Unknown),
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ServiceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == needle || (needle == "openwebui" && *k == ServiceKind::OpenWebUi))
            .ok_or_else(|| {
                let known: Vec<&str> = ServiceKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown service '{}', available: {}", s, known.join(", "))
            })
    }
}
