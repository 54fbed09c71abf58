use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::SubmitError;

/// A validated scan target: either a network in CIDR notation or a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Network(IpNet),
    Host(IpAddr),
}

impl RangeSpec {
    /// Number of scannable host addresses in the range.
    ///
    /// For IPv4 networks wider than /31 the network and broadcast addresses are
    /// excluded. IPv6 networks saturate at `u64::MAX`.
    pub fn host_count(&self) -> u64 {
        match self {
            RangeSpec::Host(_) => 1,
            RangeSpec::Network(IpNet::V4(n4)) => match n4.prefix_len() {
                32 => 1,
                31 => 2,
                p => (1u64 << (32 - p)) - 2,
            },
            RangeSpec::Network(IpNet::V6(n6)) => {
                let bits = 128 - u32::from(n6.prefix_len());
                if bits >= 64 {
                    u64::MAX
                } else {
                    1u64 << bits
                }
            }
        }
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeSpec::Network(net) => write!(f, "{net}"),
            RangeSpec::Host(ip) => write!(f, "{ip}"),
        }
    }
}

/// Parse an operator-supplied range expression.
///
/// Accepts CIDR notation (`192.168.1.0/24`) or a single address. Surrounding
/// whitespace is ignored; empty input is rejected.
pub fn parse_range(input: &str) -> std::result::Result<RangeSpec, SubmitError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SubmitError::InvalidInput(
            "please enter a network range (e.g. 192.168.1.0/24)".to_string(),
        ));
    }
    if s.contains('/') {
        s.parse::<IpNet>()
            .map(RangeSpec::Network)
            .map_err(|e| SubmitError::InvalidInput(format!("invalid CIDR `{s}`: {e}")))
    } else {
        s.parse::<IpAddr>()
            .map(RangeSpec::Host)
            .map_err(|e| SubmitError::InvalidInput(format!("invalid IP `{s}`: {e}")))
    }
}

/// Candidate scan ranges for this host: the /24 around each non-loopback IPv4
/// interface address, deduplicated and in address order.
pub fn detect_local_cidrs() -> Result<Vec<IpNet>> {
    let nets: BTreeSet<Ipv4Net> = get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) if !v4.ip.is_loopback() => Some(ipv4_to_default_cidr(v4.ip)),
            _ => None,
        })
        .collect();
    Ok(nets.into_iter().map(IpNet::V4).collect())
}

/// The /24 network containing `ip`.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::new(ip, 24).map(|n| n.trunc()).expect("/24 is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_address_maps_to_its_slash_24() {
        let cidr = ipv4_to_default_cidr(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(cidr.to_string(), "10.1.2.0/24");
        assert_eq!(parse_range(&cidr.to_string()).unwrap().host_count(), 254);
    }

    #[test]
    fn empty_and_blank_ranges_rejected() {
        assert!(matches!(parse_range(""), Err(SubmitError::InvalidInput(_))));
        assert!(matches!(parse_range("   \t"), Err(SubmitError::InvalidInput(_))));
    }

    #[test]
    fn cidr_and_single_host_accepted() {
        let r = parse_range(" 10.0.0.0/30 ").unwrap();
        assert_eq!(r.to_string(), "10.0.0.0/30");
        assert_eq!(r.host_count(), 2);
        let h = parse_range("192.168.1.7").unwrap();
        assert_eq!(h, RangeSpec::Host(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7))));
        assert_eq!(h.host_count(), 1);
    }

    #[test]
    fn malformed_ranges_rejected() {
        for bad in ["10.0.0.0/33", "300.1.1.1", "not-a-range", "10.0.0.0/"] {
            assert!(
                matches!(parse_range(bad), Err(SubmitError::InvalidInput(_))),
                "{bad} should be rejected"
            );
        }
    }
}
