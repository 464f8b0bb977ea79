//! Proxy bypass rules (`--noproxy`)

use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BypassEntry {
    Any,
    Domain(String),
    Ip(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
}

/// Comma-separated host patterns that skip the proxy.
///
/// `*` matches everything, `example.com` and `.example.com` match the domain
/// and its subdomains, plain addresses match exactly and `10.0.0.0/8` style
/// entries match by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BypassList {
    raw: String,
    entries: Vec<BypassEntry>,
}

impl BypassList {
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_entry)
            .collect();
        Self {
            raw: raw.to_string(),
            entries,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let ip: Option<IpAddr> = host.parse().ok();

        self.entries.iter().any(|entry| match entry {
            BypassEntry::Any => true,
            BypassEntry::Domain(domain) => host == *domain || host.ends_with(&format!(".{domain}")),
            BypassEntry::Ip(addr) => ip == Some(*addr),
            BypassEntry::Cidr { network, prefix } => {
                ip.is_some_and(|ip| in_network(ip, *network, *prefix))
            }
        })
    }
}

fn parse_entry(entry: &str) -> BypassEntry {
    if entry == "*" {
        return BypassEntry::Any;
    }
    if let Some((addr, prefix)) = entry.split_once('/') {
        if let (Ok(network), Ok(prefix)) = (addr.parse::<IpAddr>(), prefix.parse::<u8>()) {
            let max = if network.is_ipv4() { 32 } else { 128 };
            if prefix <= max {
                return BypassEntry::Cidr { network, prefix };
            }
        }
    }
    let bare = entry.trim_start_matches('[').trim_end_matches(']');
    if let Ok(addr) = bare.parse::<IpAddr>() {
        return BypassEntry::Ip(addr);
    }
    BypassEntry::Domain(entry.trim_start_matches('.').to_ascii_lowercase())
}

fn in_network(ip: IpAddr, network: IpAddr, prefix: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(net)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(ip) & mask == u32::from(net) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(net)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(ip) & mask == u128::from(net) & mask
        }
        _ => false,
    }
}
