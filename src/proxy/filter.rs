//! Address filter for candidate endpoints
//!
//! Classifies a `host:port` pair as structurally valid, private/reserved, or
//! inside a known CDN/datacenter range. Pure and deterministic: no DNS, no I/O.
//! The range table is data, loaded from `data/infrastructure_ranges.txt` by
//! default and replaceable from any file in the same format.

use crate::error::{Error, Result};
use ipnet::IpNet;
use serde::Serialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;

const DEFAULT_RANGES: &str = include_str!("../../data/infrastructure_ranges.txt");

/// Per-candidate classification. Computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct FilterVerdict {
    pub valid: bool,
    pub is_private: bool,
    pub is_infrastructure: bool,
}

impl FilterVerdict {
    fn invalid() -> Self {
        Self::default()
    }

    /// Policy: keep only valid, public, non-infrastructure endpoints
    pub fn is_accepted(&self) -> bool {
        self.valid && !self.is_private && !self.is_infrastructure
    }
}

/// One entry of the infrastructure table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfrastructureRange {
    pub network: IpNet,
    pub provider: String,
}

/// Table of CDN / cloud ranges
#[derive(Debug, Clone, Default)]
pub struct InfrastructureTable {
    ranges: Vec<InfrastructureRange>,
}

impl InfrastructureTable {
    /// The bundled table
    pub fn builtin() -> Self {
        // The bundled asset is covered by tests; a broken line there is a build defect.
        Self::from_str(DEFAULT_RANGES).unwrap_or_default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::configuration(format!(
                "cannot read range table {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_str(&content)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Provider owning `ip`, if any. IPv4-mapped IPv6 addresses match the
    /// IPv4 ranges.
    pub fn provider_of(&self, ip: IpAddr) -> Option<&str> {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        self.ranges
            .iter()
            .find(|range| range.network.contains(&ip))
            .map(|range| range.provider.as_str())
    }
}

impl FromStr for InfrastructureTable {
    type Err = Error;

    /// Parse `<CIDR> [provider]` lines; `#` starts a comment
    fn from_str(content: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for (number, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let cidr = fields.next().unwrap_or_default();
            let network: IpNet = cidr.parse().map_err(|_| {
                Error::configuration(format!("line {}: invalid CIDR {:?}", number + 1, cidr))
            })?;
            let provider = fields.next().unwrap_or("unknown").to_string();
            ranges.push(InfrastructureRange { network, provider });
        }
        Ok(Self { ranges })
    }
}

/// Address filter bound to one infrastructure table
#[derive(Debug, Clone)]
pub struct AddressFilter {
    table: InfrastructureTable,
}

impl Default for AddressFilter {
    fn default() -> Self {
        Self::new(InfrastructureTable::builtin())
    }
}

impl AddressFilter {
    pub fn new(table: InfrastructureTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &InfrastructureTable {
        &self.table
    }

    /// Classify one endpoint. Malformed input short-circuits with `valid=false`.
    pub fn classify(&self, host: &str, port: u16) -> FilterVerdict {
        if port == 0 {
            return FilterVerdict::invalid();
        }

        match parse_host(host) {
            Some(HostKind::Ip(ip)) => FilterVerdict {
                valid: true,
                is_private: is_private_ip(ip),
                is_infrastructure: self.table.provider_of(ip).is_some(),
            },
            Some(HostKind::Name(name)) => FilterVerdict {
                valid: true,
                is_private: is_private_name(&name),
                is_infrastructure: false,
            },
            None => FilterVerdict::invalid(),
        }
    }
}

enum HostKind {
    Ip(IpAddr),
    Name(String),
}

fn parse_host(host: &str) -> Option<HostKind> {
    let host = host.trim();
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Some(HostKind::Ip(ip));
    }
    if is_valid_hostname(host) {
        return Some(HostKind::Name(host.to_ascii_lowercase()));
    }
    None
}

/// RFC 1123 host name; the last label may not be all digits, so dotted
/// numbers that fail IPv4 parsing are rejected rather than taken as names.
pub fn is_valid_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let well_formed = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    let tld_numeric = labels
        .last()
        .map(|tld| tld.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(true);

    well_formed && !tld_numeric
}

fn is_private_name(name: &str) -> bool {
    name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local")
}

/// Private, loopback, link-local and otherwise reserved address space
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}
