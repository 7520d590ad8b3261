use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Widest CIDR block a scan accepts.
const MIN_PREFIX: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("empty address range")]
    Empty,
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("invalid prefix length in '{0}'")]
    InvalidPrefix(String),
    #[error("'{0}' is wider than /{MIN_PREFIX}")]
    TooWide(String),
    #[error("range '{0}' ends before it starts")]
    Reversed(String),
}

/// An ordered, duplicate-free list of scan targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressRange {
    hosts: Vec<String>,
    seen: HashSet<String>,
}

impl AddressRange {
    pub fn from_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for h in hosts {
            out.push(h.into());
        }
        out
    }

    /// Every usable host address of an IPv4 network no wider than /16.
    pub fn from_cidr(network: Ipv4Addr, prefix: u8) -> Result<Self, RangeError> {
        let mut out = Self::default();
        out.push_cidr(&format!("{network}/{prefix}"), network, prefix)?;
        Ok(out)
    }

    fn push_cidr(&mut self, item: &str, network: Ipv4Addr, prefix: u8) -> Result<(), RangeError> {
        if prefix > 32 {
            return Err(RangeError::InvalidPrefix(item.to_string()));
        }
        if prefix < MIN_PREFIX {
            return Err(RangeError::TooWide(item.to_string()));
        }
        for ip in cidr_hosts(network, prefix) {
            self.push(ip.to_string());
        }
        Ok(())
    }

    fn push(&mut self, host: String) {
        if self.seen.insert(host.clone()) {
            self.hosts.push(host);
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn cidr_hosts(network: Ipv4Addr, prefix: u8) -> Vec<Ipv4Addr> {
    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
    let base = u32::from(network) & mask;
    let size: u64 = 1u64 << (32 - u32::from(prefix));
    if prefix >= 31 {
        return (0..size).map(|i| Ipv4Addr::from(base + i as u32)).collect();
    }
    // Skip network and broadcast addresses.
    (1..size - 1).map(|i| Ipv4Addr::from(base + i as u32)).collect()
}

fn parse_ip(s: &str) -> Result<Ipv4Addr, RangeError> {
    s.trim()
        .parse()
        .map_err(|_| RangeError::InvalidAddress(s.trim().to_string()))
}

fn looks_like_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.chars().any(|c| c.is_ascii_alphabetic())
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

impl FromStr for AddressRange {
    type Err = RangeError;

    /// Accepts comma-separated items, each one of: `10.0.0.5`, `10.0.0.0/24`,
    /// `10.0.0.10-50`, `10.0.0.10-10.0.1.20`, or a hostname.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = AddressRange::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((net, prefix)) = item.split_once('/') {
                let net = parse_ip(net)?;
                let prefix: u8 = prefix
                    .trim()
                    .parse()
                    .map_err(|_| RangeError::InvalidPrefix(item.to_string()))?;
                out.push_cidr(item, net, prefix)?;
            } else if let Some((start, end)) = item.split_once('-').filter(|_| !looks_like_hostname(item)) {
                let start = parse_ip(start)?;
                let end = if end.contains('.') {
                    parse_ip(end)?
                } else {
                    let last: u8 = end
                        .trim()
                        .parse()
                        .map_err(|_| RangeError::InvalidAddress(item.to_string()))?;
                    let o = start.octets();
                    Ipv4Addr::new(o[0], o[1], o[2], last)
                };
                let (a, b) = (u32::from(start), u32::from(end));
                if b < a {
                    return Err(RangeError::Reversed(item.to_string()));
                }
                if b - a >= 1 << (32 - u32::from(MIN_PREFIX)) {
                    return Err(RangeError::TooWide(item.to_string()));
                }
                for v in a..=b {
                    out.push(Ipv4Addr::from(v).to_string());
                }
            } else if item.parse::<Ipv4Addr>().is_ok() || looks_like_hostname(item) {
                out.push(item.to_string());
            } else if item.parse::<std::net::Ipv6Addr>().is_ok() {
                out.push(item.to_string());
            } else {
                return Err(RangeError::InvalidAddress(item.to_string()));
            }
        }
        if out.is_empty() {
            return Err(RangeError::Empty);
        }
        Ok(out)
    }
}
