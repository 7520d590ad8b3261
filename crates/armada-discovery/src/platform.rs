use std::time::Duration;

use armada_common::{
    normalize_mac, CpuInfo, DeviceIdentity, DeviceProfile, DiskInfo, GpuInfo, GpuVendor, MemoryInfo, OsInfo,
    OsType, RemoteAccess,
};
use armada_exec::RemoteExecutor;

const KB_PER_GB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
/// Share of unified memory an Apple GPU can address.
const APPLE_GPU_MEMORY_SHARE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpuReport {
    pub vendor: GpuVendor,
    pub name: String,
    /// Largest single device, in GB.
    pub vram_total_gb: f64,
    pub vram_available_gb: f64,
    pub count: u32,
}

/// What a machine reported about itself. `None` means the probe could not
/// find out, which is different from a real zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HardwareReport {
    pub hostname: Option<String>,
    pub os_type: Option<OsType>,
    pub os_version: Option<String>,
    pub cpu_cores: Option<u32>,
    pub cpu_speed_ghz: Option<f64>,
    pub ram_total_gb: Option<f64>,
    pub ram_available_gb: Option<f64>,
    pub disk_total_gb: Option<f64>,
    pub disk_available_gb: Option<f64>,
    pub gpu: Option<GpuReport>,
    pub macs: Vec<String>,
}

impl HardwareReport {
    /// Field names the probe could not determine.
    pub fn unknown_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.hostname.is_none() {
            out.push("hostname");
        }
        if self.os_type.is_none() {
            out.push("os_type");
        }
        if self.cpu_cores.is_none() {
            out.push("cpu_cores");
        }
        if self.ram_total_gb.is_none() {
            out.push("ram_total_gb");
        }
        if self.disk_total_gb.is_none() {
            out.push("disk_total_gb");
        }
        if self.macs.is_empty() {
            out.push("mac_address");
        }
        out
    }

    /// Build the profile used by scoring and planning. Unknown values become
    /// zero (or the address, for the hostname) and each one is logged.
    pub fn into_profile(self, address: &str) -> DeviceProfile {
        for field in self.unknown_fields() {
            tracing::warn!(address = %address, field, "hardware field unknown, using zero value");
        }
        let gpu = self.gpu.map(|g| GpuInfo {
            vendor: g.vendor,
            name: g.name,
            vram_total_gb: g.vram_total_gb,
            vram_available_gb: g.vram_available_gb,
            count: g.count,
        });
        let mut macs = self.macs.into_iter();
        DeviceProfile {
            hostname: self.hostname.unwrap_or_else(|| address.to_string()),
            address: address.to_string(),
            cpu: CpuInfo {
                cores: self.cpu_cores.unwrap_or(0),
                speed_ghz: self.cpu_speed_ghz.unwrap_or(0.0),
            },
            ram: MemoryInfo {
                total_gb: self.ram_total_gb.unwrap_or(0.0),
                available_gb: self.ram_available_gb.unwrap_or(0.0),
            },
            gpu: gpu.unwrap_or_default(),
            disk: DiskInfo {
                total_gb: self.disk_total_gb.unwrap_or(0.0),
                available_gb: self.disk_available_gb.unwrap_or(0.0),
            },
            os: OsInfo {
                os_type: self.os_type.unwrap_or(OsType::Unknown),
                version: self.os_version.unwrap_or_default(),
            },
            remote_access: RemoteAccess {
                available: true,
                ..RemoteAccess::default()
            },
            identity: DeviceIdentity {
                mac_address: macs.next(),
                alternate_macs: macs.collect(),
            },
        }
    }
}

/// Runs a fixed set of read-only commands on a machine and parses the output.
#[derive(Debug, Clone)]
pub struct PlatformProbe {
    timeout: Duration,
}

impl Default for PlatformProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl PlatformProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn probe(&self, exec: &dyn RemoteExecutor) -> HardwareReport {
        let run = |cmd: &'static str| exec.capture(cmd, self.timeout);

        let mut report = HardwareReport {
            hostname: run("hostname").await.map(|h| short_hostname(&h)),
            ..HardwareReport::default()
        };
        let os_type = run("uname -s").await.map(|s| OsType::parse(&s));
        report.os_type = os_type;

        match os_type {
            Some(OsType::Macos) => self.probe_macos(exec, &mut report).await,
            Some(OsType::Linux) => self.probe_linux(exec, &mut report).await,
            other => {
                tracing::warn!(target_host = %exec.target(), os = ?other, "no hardware probe for this platform");
            }
        }
        tracing::debug!(target_host = %exec.target(), ?report, "hardware probed");
        report
    }

    pub async fn profile(&self, exec: &dyn RemoteExecutor, address: &str) -> DeviceProfile {
        self.probe(exec).await.into_profile(address)
    }

    async fn probe_linux(&self, exec: &dyn RemoteExecutor, report: &mut HardwareReport) {
        let run = |cmd: &'static str| exec.capture(cmd, self.timeout);

        report.os_version = run("cat /etc/os-release").await.and_then(|s| parse_os_release(&s));
        report.cpu_cores = run("nproc").await.and_then(|s| s.trim().parse().ok());
        report.cpu_speed_ghz = run("cat /proc/cpuinfo").await.and_then(|s| parse_cpuinfo_ghz(&s));
        if let Some(meminfo) = run("cat /proc/meminfo").await {
            let (total, available) = parse_meminfo(&meminfo);
            report.ram_total_gb = total;
            report.ram_available_gb = available;
        }
        if let Some((total, available)) = run("df -Pk /").await.and_then(|s| parse_df_kb(&s)) {
            report.disk_total_gb = Some(total);
            report.disk_available_gb = Some(available);
        }
        report.gpu = match run(
            "nvidia-smi --query-gpu=name,memory.total,memory.free --format=csv,noheader,nounits",
        )
        .await
        .and_then(|s| parse_nvidia_smi(&s))
        {
            Some(gpu) => Some(gpu),
            None => run("rocm-smi --showmeminfo vram --csv")
                .await
                .and_then(|s| parse_rocm_smi(&s)),
        };
        report.macs = run("cat /sys/class/net/*/address")
            .await
            .map(|s| parse_mac_lines(&s))
            .unwrap_or_default();
    }

    async fn probe_macos(&self, exec: &dyn RemoteExecutor, report: &mut HardwareReport) {
        let run = |cmd: &'static str| exec.capture(cmd, self.timeout);

        report.os_version = run("sw_vers -productVersion").await;
        report.cpu_cores = run("sysctl -n hw.ncpu").await.and_then(|s| s.trim().parse().ok());
        report.cpu_speed_ghz = run("sysctl -n hw.cpufrequency")
            .await
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(|hz| hz / 1e9);
        report.ram_total_gb = run("sysctl -n hw.memsize")
            .await
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(|b| b / BYTES_PER_GB);
        report.ram_available_gb = run("vm_stat").await.and_then(|s| parse_vm_stat_free_gb(&s));
        if let Some((total, available)) = run("df -Pk /").await.and_then(|s| parse_df_kb(&s)) {
            report.disk_total_gb = Some(total);
            report.disk_available_gb = Some(available);
        }
        let arm64 = run("sysctl -n hw.optional.arm64").await.map(|s| s.trim() == "1");
        if arm64 == Some(true) {
            let name = run("sysctl -n machdep.cpu.brand_string").await.unwrap_or_default();
            let vram = report.ram_total_gb.unwrap_or(0.0) * APPLE_GPU_MEMORY_SHARE;
            report.gpu = Some(GpuReport {
                vendor: GpuVendor::Apple,
                name,
                vram_total_gb: vram,
                vram_available_gb: vram,
                count: 1,
            });
        } else if let Some(display) = run("system_profiler SPDisplaysDataType").await {
            report.gpu = parse_system_profiler_gpu(&display);
        }
        report.macs = run("ifconfig").await.map(|s| parse_ifconfig_macs(&s)).unwrap_or_default();
    }
}

fn short_hostname(raw: &str) -> String {
    let h = raw.trim();
    h.split('.').next().unwrap_or(h).to_string()
}

pub fn parse_os_release(s: &str) -> Option<String> {
    s.lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// Highest `cpu MHz` in `/proc/cpuinfo`, in GHz.
pub fn parse_cpuinfo_ghz(s: &str) -> Option<f64> {
    s.lines()
        .filter(|l| l.starts_with("cpu MHz"))
        .filter_map(|l| l.split(':').nth(1)?.trim().parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .map(|mhz| mhz / 1000.0)
}

/// `(MemTotal, MemAvailable)` in GB.
pub fn parse_meminfo(s: &str) -> (Option<f64>, Option<f64>) {
    let field = |name: &str| {
        s.lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next()?.parse::<f64>().ok())
            .map(|kb| kb / KB_PER_GB)
    };
    (field("MemTotal"), field("MemAvailable"))
}

/// `(total, available)` in GB from `df -Pk` output.
pub fn parse_df_kb(s: &str) -> Option<(f64, f64)> {
    let line = s.lines().nth(1)?;
    let cols: Vec<&str> = line.split_whitespace().collect();
    let total = cols.get(1)?.parse::<f64>().ok()?;
    let available = cols.get(3)?.parse::<f64>().ok()?;
    Some((total / KB_PER_GB, available / KB_PER_GB))
}

/// One line per GPU: `name, total MiB, free MiB`.
pub fn parse_nvidia_smi(s: &str) -> Option<GpuReport> {
    let mut best: Option<GpuReport> = None;
    let mut count = 0;
    for line in s.lines() {
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        if parts.len() < 3 {
            continue;
        }
        let total = parts[1].parse::<f64>().unwrap_or(0.0) / 1024.0;
        let free = parts[2].parse::<f64>().unwrap_or(0.0) / 1024.0;
        count += 1;
        if best.as_ref().map_or(true, |b| total > b.vram_total_gb) {
            best = Some(GpuReport {
                vendor: GpuVendor::Nvidia,
                name: parts[0].to_string(),
                vram_total_gb: total,
                vram_available_gb: free,
                count: 0,
            });
        }
    }
    best.map(|g| GpuReport { count, ..g })
}

/// `rocm-smi --showmeminfo vram --csv`: `device,total bytes,used bytes`.
pub fn parse_rocm_smi(s: &str) -> Option<GpuReport> {
    let mut best: Option<GpuReport> = None;
    let mut count = 0;
    for line in s.lines().filter(|l| l.starts_with("card")) {
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        let (Some(total), Some(used)) = (
            parts.get(1).and_then(|v| v.parse::<f64>().ok()),
            parts.get(2).and_then(|v| v.parse::<f64>().ok()),
        ) else {
            continue;
        };
        count += 1;
        let total_gb = total / BYTES_PER_GB;
        if best.as_ref().map_or(true, |b| total_gb > b.vram_total_gb) {
            best = Some(GpuReport {
                vendor: GpuVendor::Amd,
                name: parts[0].to_string(),
                vram_total_gb: total_gb,
                vram_available_gb: (total - used).max(0.0) / BYTES_PER_GB,
                count: 0,
            });
        }
    }
    best.map(|g| GpuReport { count, ..g })
}

/// Free plus inactive pages from `vm_stat`, in GB.
pub fn parse_vm_stat_free_gb(s: &str) -> Option<f64> {
    let page_size = s
        .lines()
        .next()?
        .split("page size of ")
        .nth(1)?
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()?;
    let pages = |name: &str| {
        s.lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').trim().trim_end_matches('.').parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    Some((pages("Pages free") + pages("Pages inactive")) * page_size / BYTES_PER_GB)
}

/// Discrete GPU on an Intel Mac.
pub fn parse_system_profiler_gpu(s: &str) -> Option<GpuReport> {
    let name = s
        .lines()
        .find_map(|l| l.trim().strip_prefix("Chipset Model:"))?
        .trim()
        .to_string();
    let vendor = match name.to_ascii_lowercase() {
        n if n.contains("amd") || n.contains("radeon") => GpuVendor::Amd,
        n if n.contains("nvidia") || n.contains("geforce") => GpuVendor::Nvidia,
        n if n.contains("intel") => GpuVendor::Intel,
        _ => GpuVendor::None,
    };
    let vram_gb = s
        .lines()
        .find_map(|l| {
            let l = l.trim();
            l.strip_prefix("VRAM (Total):").or_else(|| l.strip_prefix("VRAM (Dynamic, Max):"))
        })
        .and_then(|v| {
            let mut it = v.split_whitespace();
            let n = it.next()?.parse::<f64>().ok()?;
            Some(match it.next() {
                Some("MB") => n / 1024.0,
                _ => n,
            })
        })
        .unwrap_or(0.0);
    Some(GpuReport {
        vendor,
        name,
        vram_total_gb: vram_gb,
        vram_available_gb: vram_gb,
        count: 1,
    })
}

pub fn parse_mac_lines(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    for mac in s.lines().filter_map(normalize_mac) {
        if !out.contains(&mac) {
            out.push(mac);
        }
    }
    out
}

pub fn parse_ifconfig_macs(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    for mac in s
        .lines()
        .filter_map(|l| l.trim().strip_prefix("ether "))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(normalize_mac)
    {
        if !out.contains(&mac) {
            out.push(mac);
        }
    }
    out
}
