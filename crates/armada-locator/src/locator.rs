use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use futures_util::future::join_all;

use armada_common::{normalize_mac, DeviceProfile};

use crate::env::{NeighborEntry, NetworkEnv};
use crate::parse::{parse_nmap, short_name};

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Wall-clock limit for the active sweep.
    pub sweep_budget: Duration,
    /// Pings in flight per sweep batch.
    pub batch_size: usize,
    /// Subnets wider than this prefix are narrowed to it around our own address.
    pub max_sweep_prefix: u8,
    pub use_network_map: bool,
    /// Timeout for the remote-access reachability check in `refresh_fleet`.
    pub reach_timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            sweep_budget: Duration::from_secs(30),
            batch_size: 64,
            max_sweep_prefix: 22,
            use_network_map: true,
            reach_timeout: Duration::from_secs(3),
        }
    }
}

/// What a device is known by, independent of its current address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub hostname: String,
    /// Normalized MACs, primary first.
    pub macs: Vec<String>,
    pub last_address: String,
}

impl IdentityRecord {
    pub fn from_profile(device: &DeviceProfile) -> Self {
        Self {
            hostname: device.hostname.clone(),
            macs: device.identity.all_macs(),
            last_address: device.address.clone(),
        }
    }
}

/// Finds a device again after its address changed.
pub struct DeviceLocator<E> {
    env: E,
    config: LocatorConfig,
}

impl<E: NetworkEnv> DeviceLocator<E> {
    pub fn new(env: E, config: LocatorConfig) -> Self {
        Self { env, config }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Try each strategy in order and return the first verified address.
    pub async fn relocate(&self, identity: &IdentityRecord) -> Option<IpAddr> {
        let host = identity.hostname.as_str();
        tracing::info!(hostname = %host, last_address = %identity.last_address, "relocating device");

        if let Some(addr) = self.from_neighbor_cache(identity).await {
            tracing::info!(hostname = %host, address = %addr, strategy = "neighbor_cache", "device located");
            return Some(addr);
        }
        if let Some(addr) = self.from_hostname(identity).await {
            tracing::info!(hostname = %host, address = %addr, strategy = "hostname", "device located");
            return Some(addr);
        }
        if let Some(addr) = self.from_sweep(identity).await {
            tracing::info!(hostname = %host, address = %addr, strategy = "sweep", "device located");
            return Some(addr);
        }
        if self.config.use_network_map {
            if let Some(addr) = self.from_network_map(identity).await {
                tracing::info!(hostname = %host, address = %addr, strategy = "network_map", "device located");
                return Some(addr);
            }
        }
        tracing::warn!(hostname = %host, "device could not be located");
        None
    }

    /// Accept `addr` only when the evidence there matches and nothing
    /// contradicts it. Hostnames compare by short name, case-insensitively.
    pub async fn verify(&self, addr: IpAddr, expected_hostname: &str, expected_macs: &[String]) -> bool {
        let expected_macs: Vec<String> = expected_macs.iter().filter_map(|m| normalize_mac(m)).collect();

        let hostname_match = if expected_hostname.trim().is_empty() {
            None
        } else {
            self.env
                .reverse_hostname(addr)
                .await
                .map(|name| short_name(&name) == short_name(expected_hostname))
        };

        let mac_match = if expected_macs.is_empty() {
            None
        } else {
            self.mac_at(addr).await.map(|mac| expected_macs.contains(&mac))
        };

        let verified = match (hostname_match, mac_match) {
            (Some(false), _) | (_, Some(false)) => false,
            (None, None) => false,
            _ => true,
        };
        tracing::debug!(
            address = %addr,
            hostname = expected_hostname,
            ?hostname_match,
            ?mac_match,
            verified,
            "candidate verified"
        );
        verified
    }

    async fn mac_at(&self, addr: IpAddr) -> Option<String> {
        let lookup = |table: Vec<NeighborEntry>| table.into_iter().find(|e| e.address == addr).map(|e| e.mac);
        if let Some(mac) = lookup(self.env.neighbor_table().await) {
            return Some(mac);
        }
        self.env.touch(addr).await;
        lookup(self.env.neighbor_table().await)
    }

    async fn first_verified(&self, identity: &IdentityRecord, candidates: Vec<IpAddr>) -> Option<IpAddr> {
        let mut seen = Vec::new();
        for addr in candidates {
            if seen.contains(&addr) {
                continue;
            }
            seen.push(addr);
            if self.verify(addr, &identity.hostname, &identity.macs).await {
                return Some(addr);
            }
        }
        None
    }

    fn matching(identity: &IdentityRecord, entries: &[NeighborEntry]) -> Vec<IpAddr> {
        entries
            .iter()
            .filter(|e| identity.macs.contains(&e.mac))
            .map(|e| e.address)
            .collect()
    }

    async fn from_neighbor_cache(&self, identity: &IdentityRecord) -> Option<IpAddr> {
        if identity.macs.is_empty() {
            return None;
        }
        let table = self.env.neighbor_table().await;
        self.first_verified(identity, Self::matching(identity, &table)).await
    }

    async fn from_hostname(&self, identity: &IdentityRecord) -> Option<IpAddr> {
        let name = identity.hostname.trim();
        if name.is_empty() {
            return None;
        }
        let mut candidates = self.env.resolve(name).await;
        if !name.ends_with(".local") {
            let mdns = format!("{}.local", short_name(name));
            candidates.extend(self.env.resolve(&mdns).await);
        }
        self.first_verified(identity, candidates).await
    }

    /// Ping every local subnet host in batches, re-reading the neighbor cache
    /// after each batch.
    async fn from_sweep(&self, identity: &IdentityRecord) -> Option<IpAddr> {
        if identity.macs.is_empty() {
            return None;
        }
        let started = Instant::now();
        let mut targets: Vec<IpAddr> = Vec::new();
        for (ip, prefix) in self.env.local_subnets().await {
            for host in sweep_hosts(ip, prefix, self.config.max_sweep_prefix) {
                let host = IpAddr::V4(host);
                if !targets.contains(&host) {
                    targets.push(host);
                }
            }
        }
        tracing::info!(hosts = targets.len(), "sweeping local subnets");

        for batch in targets.chunks(self.config.batch_size.max(1)) {
            if started.elapsed() >= self.config.sweep_budget {
                tracing::warn!(budget_secs = self.config.sweep_budget.as_secs(), "sweep budget exhausted");
                break;
            }
            join_all(batch.iter().map(|addr| self.env.touch(*addr))).await;
            if let Some(addr) = self.from_neighbor_cache(identity).await {
                return Some(addr);
            }
        }
        None
    }

    async fn from_network_map(&self, identity: &IdentityRecord) -> Option<IpAddr> {
        if identity.macs.is_empty() {
            return None;
        }
        for (ip, prefix) in self.env.local_subnets().await {
            let net = network_of(ip, prefix);
            let Some(out) = self.env.network_map(&format!("{net}/{prefix}")).await else {
                tracing::debug!("network map unavailable");
                return None;
            };
            let entries = parse_nmap(&out);
            if let Some(addr) = self.first_verified(identity, Self::matching(identity, &entries)).await {
                return Some(addr);
            }
        }
        None
    }
}

fn network_of(ip: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix.min(32))) };
    Ipv4Addr::from(u32::from(ip) & mask)
}

/// Host addresses of the subnet containing `ip`, narrowed to `max_prefix`
/// around `ip` when the subnet is wider. Our own address is excluded.
pub(crate) fn sweep_hosts(ip: Ipv4Addr, prefix: u8, max_prefix: u8) -> Vec<Ipv4Addr> {
    let prefix = prefix.max(max_prefix).min(32);
    if prefix >= 31 {
        return Vec::new();
    }
    let base = u32::from(network_of(ip, prefix));
    let size = 1u32 << (32 - u32::from(prefix));
    (1..size - 1)
        .map(|i| Ipv4Addr::from(base + i))
        .filter(|h| *h != ip)
        .collect()
}
