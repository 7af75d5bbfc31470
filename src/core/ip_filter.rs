//! IP firewall rules with CIDR support.
//!
//! Evaluates a client address against block and allow lists of IP-or-CIDR
//! literals. Parsed networks are memoized in a [`CidrCache`] so hot paths
//! never re-parse the same literal.

use std::{
    collections::HashMap,
    net::IpAddr,
    str::FromStr,
    sync::RwLock,
};

/// CIDR network representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    /// Base IP address
    addr: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl IpNetwork {
    /// Create a new IP network from an address and prefix length
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, String> {
        match addr {
            IpAddr::V4(_) if prefix_len > 32 => {
                return Err("IPv4 prefix length must be <= 32".to_string());
            }
            IpAddr::V6(_) if prefix_len > 128 => {
                return Err("IPv6 prefix length must be <= 128".to_string());
            }
            _ => {}
        }

        Ok(Self { addr, prefix_len })
    }

    /// Parse from CIDR notation (e.g., "192.168.1.0/24"). A bare address is
    /// treated as a host network (/32 or /128).
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some((ip_str, prefix_str)) = s.split_once('/') {
            let addr = IpAddr::from_str(ip_str).map_err(|e| format!("Invalid IP address: {e}"))?;
            let prefix_len: u8 = prefix_str
                .parse()
                .map_err(|e| format!("Invalid prefix length: {e}"))?;
            Self::new(addr, prefix_len)
        } else {
            let addr = IpAddr::from_str(s).map_err(|e| format!("Invalid IP address: {e}"))?;
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Ok(Self { addr, prefix_len })
        }
    }

    /// Check if an IP address is contained in this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        // IPs must be same version
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let net_bits = u32::from(net);
                let addr_bits = u32::from(addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u32 << (32 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let net_bits = u128::from(net);
                let addr_bits = u128::from(addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u128 << (128 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            _ => false,
        }
    }
}

impl std::str::FromStr for IpNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IpNetwork::parse(s)
    }
}

/// Memoizes parsed IP-or-CIDR literals.
///
/// Read-check then write-insert-if-absent under a reader/writer lock; an
/// unparseable literal is remembered as absent and re-attempted (validation
/// rejects such configs up front, so this only happens on hand-built lists).
/// Cleared after each successful config reload to bound growth across
/// configurations with high literal churn.
pub struct CidrCache {
    parsed: RwLock<HashMap<String, IpNetwork>>,
}

impl CidrCache {
    pub fn new() -> Self {
        Self {
            parsed: RwLock::new(HashMap::new()),
        }
    }

    /// Cached parse of one literal, memoizing on first success.
    pub fn get_or_parse(&self, literal: &str) -> Option<IpNetwork> {
        if let Some(network) = self
            .parsed
            .read()
            .expect("cidr cache lock poisoned")
            .get(literal)
        {
            return Some(*network);
        }

        let network = IpNetwork::parse(literal).ok()?;

        let mut parsed = self.parsed.write().expect("cidr cache lock poisoned");
        Some(*parsed.entry(literal.to_string()).or_insert(network))
    }

    /// Drop every memoized entry.
    pub fn clear(&self) {
        self.parsed
            .write()
            .expect("cidr cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.parsed.read().expect("cidr cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `ip` equals or falls inside any literal in the list.
    pub fn ip_in_list(&self, ip: IpAddr, list: &[String]) -> bool {
        list.iter().any(|literal| {
            self.get_or_parse(literal)
                .is_some_and(|network| network.contains(ip))
        })
    }
}

impl Default for CidrCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of evaluating the IP firewall for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVerdict {
    Allowed,
    /// Matched a blocklist entry.
    Blocked,
    /// A non-empty allowlist applied and the IP matched none of its entries.
    NotAllowed,
}

/// Evaluate block list first, then the allow restriction. The blocklist wins
/// regardless of any allowlist match.
pub fn evaluate_ip(
    cache: &CidrCache,
    ip: IpAddr,
    blocklist: &[String],
    allowlist: &[String],
) -> IpVerdict {
    if cache.ip_in_list(ip, blocklist) {
        return IpVerdict::Blocked;
    }

    if !allowlist.is_empty() && !cache.ip_in_list(ip, allowlist) {
        return IpVerdict::NotAllowed;
    }

    IpVerdict::Allowed
}
