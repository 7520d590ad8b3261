//! Parsers for the neighbor-cache and network tools the locator shells out to.

use std::net::{IpAddr, Ipv4Addr};

use armada_common::normalize_mac;

use crate::env::NeighborEntry;

/// `ip neigh show`: `10.0.0.5 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`.
/// Entries without a link-layer address (FAILED, INCOMPLETE) are skipped.
pub fn parse_ip_neigh(out: &str) -> Vec<NeighborEntry> {
    out.lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let address: IpAddr = words.next()?.parse().ok()?;
            let mac = words
                .skip_while(|w| *w != "lladdr")
                .nth(1)
                .and_then(normalize_mac)?;
            Some(NeighborEntry { address, mac })
        })
        .collect()
}

/// `arp -an` on Linux and macOS: `? (10.0.0.5) at aa:bb:cc:dd:ee:ff [ether] on eth0`.
pub fn parse_arp_an(out: &str) -> Vec<NeighborEntry> {
    out.lines()
        .filter_map(|line| {
            let open = line.find('(')?;
            let close = line[open..].find(')')? + open;
            let address: IpAddr = line[open + 1..close].parse().ok()?;
            let rest = line[close + 1..].trim_start().strip_prefix("at ")?;
            let mac = normalize_mac(rest.split_whitespace().next()?)?;
            Some(NeighborEntry { address, mac })
        })
        .collect()
}

/// `nmap -sn` host blocks. Only hosts that reported a MAC address are returned.
pub fn parse_nmap(out: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();
    let mut current: Option<IpAddr> = None;
    for line in out.lines() {
        if let Some(rest) = line.strip_prefix("Nmap scan report for ") {
            let addr = match (rest.rfind('('), rest.rfind(')')) {
                (Some(open), Some(close)) if open < close => &rest[open + 1..close],
                _ => rest.trim(),
            };
            current = addr.parse().ok();
        } else if let Some(rest) = line.trim().strip_prefix("MAC Address: ") {
            if let (Some(address), Some(mac)) = (current.take(), rest.split_whitespace().next().and_then(normalize_mac)) {
                entries.push(NeighborEntry { address, mac });
            }
        }
    }
    entries
}

/// `ip -o -f inet addr show`: `2: eth0    inet 10.0.0.20/24 brd ...`.
/// Loopback networks are skipped.
pub fn parse_ip_addr(out: &str) -> Vec<(Ipv4Addr, u8)> {
    out.lines()
        .filter_map(|line| {
            let cidr = line.split_whitespace().skip_while(|w| *w != "inet").nth(1)?;
            let (ip, prefix) = cidr.split_once('/')?;
            let ip: Ipv4Addr = ip.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            (!ip.is_loopback() && prefix <= 32).then_some((ip, prefix))
        })
        .collect()
}

/// macOS `ifconfig`: `inet 10.0.0.20 netmask 0xffffff00 broadcast ...`.
pub fn parse_ifconfig_inet(out: &str) -> Vec<(Ipv4Addr, u8)> {
    out.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("inet ")?;
            let mut words = rest.split_whitespace();
            let ip: Ipv4Addr = words.next()?.parse().ok()?;
            let mask = words.skip_while(|w| *w != "netmask").nth(1)?;
            let mask = u32::from_str_radix(mask.trim_start_matches("0x"), 16).ok()?;
            (!ip.is_loopback()).then_some((ip, mask.count_ones() as u8))
        })
        .collect()
}

/// First name in `getent hosts` output, or the PTR target in `host` output.
pub fn parse_reverse_name(out: &str) -> Option<String> {
    for line in out.lines() {
        if let Some((_, name)) = line.split_once("domain name pointer ") {
            let name = name.trim().trim_end_matches('.');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        let mut words = line.split_whitespace();
        if words.next().and_then(|w| w.parse::<IpAddr>().ok()).is_some() {
            if let Some(name) = words.next() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Lowercased host part of a name, with any `.local` or domain suffix removed.
pub fn short_name(name: &str) -> String {
    let name = name.trim().trim_end_matches('.');
    name.split('.').next().unwrap_or(name).to_ascii_lowercase()
}
