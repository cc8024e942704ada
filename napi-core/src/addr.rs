//! Address-family helpers: subnet overlap, RFC1918/ULA membership, and the
//! dotted/colon canonical string forms used on the wire (spec.md §3, §9).
//!
//! Grounded on the teacher's `mvirt-net::grpc::validation` overlap checks
//! (`ipv4_subnets_overlap` / `ipv6_prefixes_overlap`), generalized to also
//! answer "is this subnet confined to a private range" for fabric networks.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The two address families a network may use (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub fn of(net: &IpNet) -> Self {
        match net {
            IpNet::V4(_) => Family::Ipv4,
            IpNet::V6(_) => Family::Ipv6,
        }
    }

    pub fn of_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Ipv4 => write!(f, "ipv4"),
            Family::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// True if two IPv4 subnets overlap at all (either contains the other's
/// network or broadcast address).
pub fn ipv4_subnets_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network())
        || a.contains(&b.broadcast())
        || b.contains(&a.network())
        || b.contains(&a.broadcast())
}

/// True if two IPv6 prefixes overlap.
pub fn ipv6_prefixes_overlap(a: &Ipv6Net, b: &Ipv6Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// True if two subnets of the same family overlap. Panics if called with
/// mismatched families — callers must check family equality first.
pub fn subnets_overlap(a: &IpNet, b: &IpNet) -> bool {
    match (a, b) {
        (IpNet::V4(a), IpNet::V4(b)) => ipv4_subnets_overlap(a, b),
        (IpNet::V6(a), IpNet::V6(b)) => ipv6_prefixes_overlap(a, b),
        _ => panic!("subnets_overlap called with mismatched address families"),
    }
}

/// RFC1918 private IPv4 ranges: 10/8, 172.16/12, 192.168/16.
fn rfc1918_blocks() -> [Ipv4Net; 3] {
    [
        Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap(),
        Ipv4Net::new(Ipv4Addr::new(172, 16, 0, 0), 12).unwrap(),
        Ipv4Net::new(Ipv4Addr::new(192, 168, 0, 0), 16).unwrap(),
    ]
}

/// Unique Local Address range for IPv6: fc00::/7.
fn ula_block() -> Ipv6Net {
    Ipv6Net::new(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7).unwrap()
}

/// True if `net` is entirely contained within RFC1918 (v4) or ULA (v6).
/// Fabric networks (spec.md §3 invariants) must satisfy this.
pub fn is_private(net: &IpNet) -> bool {
    match net {
        IpNet::V4(v4) => rfc1918_blocks().iter().any(|block| {
            block.contains(&v4.network()) && block.contains(&v4.broadcast())
        }),
        IpNet::V6(v6) => {
            let ula = ula_block();
            ula.contains(&v6.network())
        }
    }
}

/// True if `addr` falls within `net`, regardless of family mismatch (returns
/// false rather than panicking on mismatch, unlike `subnets_overlap`).
pub fn net_contains_addr(net: &IpNet, addr: &IpAddr) -> bool {
    match (net, addr) {
        (IpNet::V4(n), IpAddr::V4(a)) => n.contains(a),
        (IpNet::V6(n), IpAddr::V6(a)) => n.contains(a),
        _ => false,
    }
}

/// IPv4 broadcast address of a subnet (spec.md §3: "for IPv4, neither
/// endpoint is the broadcast address").
pub fn ipv4_broadcast(net: &Ipv4Net) -> Ipv4Addr {
    net.broadcast()
}

/// Canonical wire string for an address: dotted for v4, colon-delimited v6
/// (spec.md §9 — no dual-write, single canonical string form).
pub fn addr_to_string(addr: &IpAddr) -> String {
    addr.to_string()
}

/// Increment an IP address by one, staying within the same family. Returns
/// `None` on overflow (e.g. 255.255.255.255 + 1).
pub fn next_addr(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) => {
            let n = u32::from(v4).checked_add(1)?;
            Some(IpAddr::V4(Ipv4Addr::from(n)))
        }
        IpAddr::V6(v6) => {
            let n = u128::from(v6).checked_add(1)?;
            Some(IpAddr::V6(Ipv6Addr::from(n)))
        }
    }
}

/// Decrement an IP address by one. Returns `None` on underflow.
pub fn prev_addr(addr: IpAddr) -> Option<IpAddr> {
    match addr {
        IpAddr::V4(v4) => {
            let n = u32::from(v4).checked_sub(1)?;
            Some(IpAddr::V4(Ipv4Addr::from(n)))
        }
        IpAddr::V6(v6) => {
            let n = u128::from(v6).checked_sub(1)?;
            Some(IpAddr::V6(Ipv6Addr::from(n)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ipv4_overlap() {
        let a: Ipv4Net = "10.2.1.0/24".parse().unwrap();
        let b: Ipv4Net = "10.2.1.128/25".parse().unwrap();
        assert!(ipv4_subnets_overlap(&a, &b));
    }

    #[test]
    fn detects_ipv4_no_overlap() {
        let a: Ipv4Net = "172.16.0.0/22".parse().unwrap();
        let b: Ipv4Net = "172.16.1.0/24".parse().unwrap();
        assert!(ipv4_subnets_overlap(&a, &b));

        let c: Ipv4Net = "172.20.0.0/22".parse().unwrap();
        assert!(!ipv4_subnets_overlap(&a, &c));
    }

    #[test]
    fn rfc1918_membership() {
        let priv_net: IpNet = "10.2.1.64/26".parse().unwrap();
        assert!(is_private(&priv_net));

        let pub_net: IpNet = "172.20.0.0/22".parse().unwrap();
        assert!(!is_private(&pub_net));
    }

    #[test]
    fn ula_membership() {
        let priv_net: IpNet = "fd00:1234::/64".parse().unwrap();
        assert!(is_private(&priv_net));

        let pub_net: IpNet = "2001:db8::/32".parse().unwrap();
        assert!(!is_private(&pub_net));
    }

    #[test]
    fn increments_and_decrements_across_family() {
        let v4: IpAddr = "192.0.2.5".parse().unwrap();
        assert_eq!(next_addr(v4).unwrap().to_string(), "192.0.2.6");
        assert_eq!(prev_addr(v4).unwrap().to_string(), "192.0.2.4");
    }
}
