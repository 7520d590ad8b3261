use serde::{Deserialize, Serialize};

use crate::score::score;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Apple,
    Intel,
    #[default]
    None,
}

impl GpuVendor {
    /// Vendors whose accelerators the AI services can actually use.
    pub fn is_recognized(self) -> bool {
        matches!(self, GpuVendor::Nvidia | GpuVendor::Amd | GpuVendor::Apple)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Linux,
    Macos,
    Windows,
    #[default]
    Unknown,
}

impl OsType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "linux" => OsType::Linux,
            "darwin" | "macos" | "mac" | "osx" => OsType::Macos,
            s if s.starts_with("windows") || s.starts_with("mingw") || s.starts_with("msys") => {
                OsType::Windows
            }
            _ => OsType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CpuInfo {
    pub cores: u32,
    #[serde(default)]
    pub speed_ghz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MemoryInfo {
    pub total_gb: f64,
    #[serde(default)]
    pub available_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GpuInfo {
    #[serde(default)]
    pub vendor: GpuVendor,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vram_total_gb: f64,
    #[serde(default)]
    pub vram_available_gb: f64,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiskInfo {
    pub total_gb: f64,
    #[serde(default)]
    pub available_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OsInfo {
    #[serde(rename = "type", default)]
    pub os_type: OsType,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteAccess {
    pub available: bool,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
}

impl Default for RemoteAccess {
    fn default() -> Self {
        Self {
            available: false,
            port: 22,
            username: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceIdentity {
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub alternate_macs: Vec<String>,
}

impl DeviceIdentity {
    /// All known MACs, normalized, primary first.
    pub fn all_macs(&self) -> Vec<String> {
        let mut out = Vec::new();
        for mac in self.mac_address.iter().chain(self.alternate_macs.iter()) {
            if let Some(m) = normalize_mac(mac) {
                if !out.contains(&m) {
                    out.push(m);
                }
            }
        }
        out
    }
}

/// Normalize a MAC to lowercase colon-separated form.
/// Accepts `-` separators and single-digit octets (`a:b:c:d:e:f` as printed by macOS `arp`).
pub fn normalize_mac(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.trim().split([':', '-']).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut octets = Vec::with_capacity(6);
    for p in parts {
        if p.is_empty() || p.len() > 2 {
            return None;
        }
        let v = u8::from_str_radix(p, 16).ok()?;
        octets.push(format!("{v:02x}"));
    }
    let mac = octets.join(":");
    if mac == "00:00:00:00:00:00" || mac == "ff:ff:ff:ff:ff:ff" {
        return None;
    }
    Some(mac)
}

/// A device as seen by the planner. The capability score is never stored:
/// it is derived from the hardware fields on every read, and the
/// `capability_score` field of the serialized form is ignored on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "DeviceRecord", into = "DeviceRecord")]
pub struct DeviceProfile {
    pub hostname: String,
    pub address: String,
    pub cpu: CpuInfo,
    pub ram: MemoryInfo,
    pub gpu: GpuInfo,
    pub disk: DiskInfo,
    pub os: OsInfo,
    pub remote_access: RemoteAccess,
    pub identity: DeviceIdentity,
}

impl DeviceProfile {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            cpu: CpuInfo::default(),
            ram: MemoryInfo::default(),
            gpu: GpuInfo::default(),
            disk: DiskInfo::default(),
            os: OsInfo::default(),
            remote_access: RemoteAccess::default(),
            identity: DeviceIdentity::default(),
        }
    }

    pub fn capability_score(&self) -> f64 {
        score(self)
    }

    /// True when the device carries at least one accelerator the AI services can use.
    pub fn has_accelerator(&self) -> bool {
        self.gpu.vendor.is_recognized() && self.gpu.count > 0
    }

    /// VRAM usable by the services; zero without a recognized accelerator.
    pub fn usable_vram_gb(&self) -> f64 {
        if self.has_accelerator() {
            self.gpu.vram_total_gb
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceRecord {
    hostname: String,
    #[serde(alias = "ip_address")]
    address: String,
    #[serde(default)]
    cpu: CpuInfo,
    #[serde(default)]
    ram: MemoryInfo,
    #[serde(default)]
    gpu: GpuInfo,
    #[serde(default)]
    disk: DiskInfo,
    #[serde(default)]
    os: OsInfo,
    #[serde(default)]
    remote_access: RemoteAccess,
    #[serde(default)]
    identity: DeviceIdentity,
    #[serde(default)]
    capability_score: f64,
}

impl From<DeviceRecord> for DeviceProfile {
    fn from(r: DeviceRecord) -> Self {
        Self {
            hostname: r.hostname,
            address: r.address,
            cpu: r.cpu,
            ram: r.ram,
            gpu: r.gpu,
            disk: r.disk,
            os: r.os,
            remote_access: r.remote_access,
            identity: r.identity,
        }
    }
}

impl From<DeviceProfile> for DeviceRecord {
    fn from(p: DeviceProfile) -> Self {
        let capability_score = p.capability_score();
        Self {
            hostname: p.hostname,
            address: p.address,
            cpu: p.cpu,
            ram: p.ram,
            gpu: p.gpu,
            disk: p.disk,
            os: p.os,
            remote_access: p.remote_access,
            identity: p.identity,
            capability_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA-BB-CC-00-11-22").as_deref(), Some("aa:bb:cc:00:11:22"));
        assert_eq!(normalize_mac("a:b:c:d:e:f").as_deref(), Some("0a:0b:0c:0d:0e:0f"));
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("(incomplete)"), None);
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee"), None);
    }

    #[test]
    fn test_stored_score_is_ignored_on_load() {
        let mut dev = DeviceProfile::new("box", "10.0.0.2");
        dev.ram.total_gb = 32.0;
        let mut v = serde_json::to_value(&dev).unwrap();
        let expected = dev.capability_score();
        assert_eq!(v["capability_score"].as_f64(), Some(expected));

        v["capability_score"] = serde_json::json!(99.0);
        let loaded: DeviceProfile = serde_json::from_value(v).unwrap();
        assert_eq!(loaded.capability_score(), expected);
    }

    #[test]
    fn test_accelerator_requires_recognized_vendor() {
        let mut dev = DeviceProfile::new("box", "10.0.0.2");
        dev.gpu = GpuInfo {
            vendor: GpuVendor::Intel,
            name: "UHD 770".into(),
            vram_total_gb: 8.0,
            vram_available_gb: 8.0,
            count: 1,
        };
        assert!(!dev.has_accelerator());
        assert_eq!(dev.usable_vram_gb(), 0.0);

        dev.gpu.vendor = GpuVendor::Nvidia;
        assert!(dev.has_accelerator());
        assert_eq!(dev.usable_vram_gb(), 8.0);
    }

    #[test]
    fn test_all_macs_dedups() {
        let id = DeviceIdentity {
            mac_address: Some("AA:BB:CC:DD:EE:01".into()),
            alternate_macs: vec!["aa-bb-cc-dd-ee-01".into(), "aa:bb:cc:dd:ee:02".into()],
        };
        assert_eq!(id.all_macs(), vec!["aa:bb:cc:dd:ee:01", "aa:bb:cc:dd:ee:02"]);
    }
}
