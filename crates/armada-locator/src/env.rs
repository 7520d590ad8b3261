use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::parse::{parse_arp_an, parse_ifconfig_inet, parse_ip_addr, parse_ip_neigh, parse_reverse_name};

/// One neighbor-cache row: an address and the MAC it was last seen with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub address: IpAddr,
    /// Normalized lowercase, colon-separated.
    pub mac: String,
}

/// Everything the locator needs from the local network stack.
#[async_trait]
pub trait NetworkEnv: Send + Sync {
    async fn neighbor_table(&self) -> Vec<NeighborEntry>;

    /// Forward lookup; empty when the name does not resolve.
    async fn resolve(&self, name: &str) -> Vec<IpAddr>;

    async fn reverse_hostname(&self, addr: IpAddr) -> Option<String>;

    /// Send one short reachability probe so the neighbor cache learns `addr`.
    async fn touch(&self, addr: IpAddr) -> bool;

    /// Directly attached IPv4 networks, excluding loopback.
    async fn local_subnets(&self) -> Vec<(Ipv4Addr, u8)>;

    /// Raw `nmap -sn` output for a CIDR, or `None` when nmap is unavailable.
    async fn network_map(&self, cidr: &str) -> Option<String>;

    async fn port_open(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// The real network, through the usual command-line tools.
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    command_timeout: Duration,
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl SystemNetwork {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let child = Command::new(program).args(args).kill_on_drop(true).output();
        match tokio::time::timeout(self.command_timeout, child).await {
            Ok(Ok(out)) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(Ok(out)) => {
                tracing::debug!(program, code = ?out.status.code(), "command failed");
                None
            }
            Ok(Err(e)) => {
                tracing::debug!(program, error = %e, "command not available");
                None
            }
            Err(_) => {
                tracing::debug!(program, "command timed out");
                None
            }
        }
    }
}

#[async_trait]
impl NetworkEnv for SystemNetwork {
    async fn neighbor_table(&self) -> Vec<NeighborEntry> {
        if let Some(out) = self.run("ip", &["neigh", "show"]).await {
            let entries = parse_ip_neigh(&out);
            if !entries.is_empty() {
                return entries;
            }
        }
        self.run("arp", &["-an"])
            .await
            .map(|out| parse_arp_an(&out))
            .unwrap_or_default()
    }

    async fn resolve(&self, name: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => {
                let mut out: Vec<IpAddr> = Vec::new();
                for a in addrs {
                    if !out.contains(&a.ip()) {
                        out.push(a.ip());
                    }
                }
                out
            }
            Err(e) => {
                tracing::debug!(name, error = %e, "name did not resolve");
                Vec::new()
            }
        }
    }

    async fn reverse_hostname(&self, addr: IpAddr) -> Option<String> {
        let ip = addr.to_string();
        if let Some(name) = self.run("getent", &["hosts", ip.as_str()]).await.and_then(|o| parse_reverse_name(&o)) {
            return Some(name);
        }
        self.run("host", &[ip.as_str()]).await.and_then(|o| parse_reverse_name(&o))
    }

    async fn touch(&self, addr: IpAddr) -> bool {
        let ip = addr.to_string();
        // BSD ping takes the wait in milliseconds.
        let wait: &[&str] = if cfg!(target_os = "macos") { &["-W", "1000"] } else { &["-W", "1"] };
        let mut args = vec!["-c", "1"];
        args.extend_from_slice(wait);
        args.push(ip.as_str());
        self.run("ping", &args).await.is_some()
    }

    async fn local_subnets(&self) -> Vec<(Ipv4Addr, u8)> {
        if let Some(out) = self.run("ip", &["-o", "-f", "inet", "addr", "show"]).await {
            return parse_ip_addr(&out);
        }
        self.run("ifconfig", &[])
            .await
            .map(|out| parse_ifconfig_inet(&out))
            .unwrap_or_default()
    }

    async fn network_map(&self, cidr: &str) -> Option<String> {
        self.run("nmap", &["-sn", "-n", cidr]).await
    }

    async fn port_open(&self, host: &str, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}
