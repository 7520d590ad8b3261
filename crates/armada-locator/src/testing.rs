use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::env::{NeighborEntry, NetworkEnv};
use crate::locator::IdentityRecord;

/// A scripted network. Hosts in `hidden` join the neighbor table only
/// after they have been touched.
#[derive(Default)]
pub struct FakeNetwork {
    pub table: Mutex<Vec<NeighborEntry>>,
    pub hidden: HashMap<IpAddr, String>,
    pub names: HashMap<String, Vec<IpAddr>>,
    pub reverse: HashMap<IpAddr, String>,
    pub subnets: Vec<(Ipv4Addr, u8)>,
    pub nmap: Option<String>,
    pub open_ports: Vec<(String, u16)>,
    pub touches: AtomicUsize,
}

#[async_trait]
impl NetworkEnv for FakeNetwork {
    async fn neighbor_table(&self) -> Vec<NeighborEntry> {
        self.table.lock().unwrap().clone()
    }

    async fn resolve(&self, name: &str) -> Vec<IpAddr> {
        self.names.get(name).cloned().unwrap_or_default()
    }

    async fn reverse_hostname(&self, addr: IpAddr) -> Option<String> {
        self.reverse.get(&addr).cloned()
    }

    async fn touch(&self, addr: IpAddr) -> bool {
        self.touches.fetch_add(1, Ordering::SeqCst);
        if let Some(mac) = self.hidden.get(&addr) {
            let mut table = self.table.lock().unwrap();
            if !table.iter().any(|e| e.address == addr) {
                table.push(NeighborEntry { address: addr, mac: mac.clone() });
            }
            return true;
        }
        false
    }

    async fn local_subnets(&self) -> Vec<(Ipv4Addr, u8)> {
        self.subnets.clone()
    }

    async fn network_map(&self, _cidr: &str) -> Option<String> {
        self.nmap.clone()
    }

    async fn port_open(&self, host: &str, port: u16, _timeout: Duration) -> bool {
        self.open_ports.iter().any(|(h, p)| h == host && *p == port)
    }
}

pub const MAC: &str = "52:54:00:ab:cd:ef";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn identity() -> IdentityRecord {
    IdentityRecord {
        hostname: "gpu-box".into(),
        macs: vec![MAC.into()],
        last_address: "10.0.0.5".into(),
    }
}

