//! Expands resolved IPv4 addresses into the hosts of their enclosing network.
//!
//! Narrow masks amplify quickly: a handful of addresses at `/16` become tens
//! of thousands of probe targets. No cap is applied here.
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use cidr_utils::cidr::IpCidr;
use log::debug;

/// Mask width that disables expansion.
pub const HOST_MASK: u8 = 32;

/// Masks at or above this width are enumerated directly; coarser ones are
/// first split into `/SPLIT_PREFIX` blocks.
const DIRECT_ENUMERATION_MIN: u8 = 20;
const SPLIT_PREFIX: u8 = 22;

/// Output of [`expand`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubnetExpansion {
    /// Network markers: one `a.b.c/M` slug per expanded network, plus every
    /// `/22` block string when the network was split.
    pub networks: Vec<String>,
    /// Host addresses not already among the input addresses, each once.
    pub hosts: Vec<String>,
}

/// Expands each IPv4 address in `ips` to the hosts of its `/mask` network.
///
/// Entries that already are network slugs (contain `/`) and non-IPv4
/// entries are skipped. A mask of 32 returns an empty expansion.
pub fn expand(ips: &[String], mask: u8) -> SubnetExpansion {
    let mut expansion = SubnetExpansion::default();
    if mask >= HOST_MASK {
        return expansion;
    }

    let known: HashSet<&str> = ips.iter().map(String::as_str).collect();
    let mut seen_networks = HashSet::new();
    let mut seen_hosts = HashSet::new();

    for ip in ips {
        if ip.contains('/') {
            continue;
        }
        let Ok(addr) = Ipv4Addr::from_str(ip) else {
            debug!("Not expanding non-IPv4 address {ip}");
            continue;
        };

        let [a, b, c, _] = addr.octets();
        let slug = format!("{a}.{b}.{c}/{mask}");
        let network = network_address(addr, mask);
        if !seen_networks.insert(network) {
            continue;
        }
        expansion.networks.push(slug);

        let mut push_host = |host: Ipv4Addr| {
            let host = host.to_string();
            if !known.contains(host.as_str()) && seen_hosts.insert(host.clone()) {
                expansion.hosts.push(host);
            }
        };

        if mask >= DIRECT_ENUMERATION_MIN {
            usable_hosts(network, mask).for_each(&mut push_host);
        } else {
            for block in split(network, mask, SPLIT_PREFIX) {
                expansion.networks.push(format!("{block}/{SPLIT_PREFIX}"));
                cidr_addresses(block, SPLIT_PREFIX)
                    .into_iter()
                    .for_each(&mut push_host);
            }
        }
    }

    debug!(
        "Expanded {} addresses at /{mask} into {} networks and {} hosts",
        ips.len(),
        expansion.networks.len(),
        expansion.hosts.len()
    );
    expansion
}

fn netmask(mask: u8) -> u32 {
    u32::MAX.checked_shl(u32::from(HOST_MASK - mask)).unwrap_or(0)
}

fn network_address(addr: Ipv4Addr, mask: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & netmask(mask))
}

/// Every address in `network/mask`, network and broadcast included.
fn cidr_addresses(network: Ipv4Addr, mask: u8) -> Vec<Ipv4Addr> {
    let Ok(cidr) = IpCidr::from_str(&format!("{network}/{mask}")) else {
        return Vec::new();
    };

    cidr.iter()
        .map(|c| c.address())
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect()
}

/// Addresses of `network/mask` minus the network and broadcast addresses.
/// `/31` keeps both ends.
fn usable_hosts(network: Ipv4Addr, mask: u8) -> impl Iterator<Item = Ipv4Addr> {
    let first = u32::from(network);
    let last = first | !netmask(mask);
    let point_to_point = mask >= HOST_MASK - 1;

    cidr_addresses(network, mask).into_iter().filter(move |&addr| {
        point_to_point || (u32::from(addr) != first && u32::from(addr) != last)
    })
}

/// Splits `network/mask` into its `/prefix` blocks.
fn split(network: Ipv4Addr, mask: u8, prefix: u8) -> impl Iterator<Item = Ipv4Addr> {
    let start = u64::from(u32::from(network));
    let size = 1u64 << (HOST_MASK - mask);
    let step = 1u64 << (HOST_MASK - prefix);

    (start..start + size)
        .step_by(usize::try_from(step).unwrap_or(usize::MAX))
        .filter_map(|block| u32::try_from(block).ok())
        .map(Ipv4Addr::from)
}

#[cfg(test)]
mod tests {
    use super::{expand, SubnetExpansion};

    fn ips(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn host_mask_is_noop() {
        let input = ips(&["10.0.0.5", "192.168.1.1"]);
        assert_eq!(expand(&input, 32), SubnetExpansion::default());
    }

    #[test]
    fn mask_24_enumerates_each_host_once() {
        let expansion = expand(&ips(&["10.0.0.5"]), 24);

        assert_eq!(expansion.networks, ["10.0.0/24"]);
        // 254 usable hosts, minus the input address itself.
        assert_eq!(expansion.hosts.len(), 253);
        assert!(expansion.hosts.contains(&"10.0.0.1".to_owned()));
        assert!(expansion.hosts.contains(&"10.0.0.254".to_owned()));
        assert!(!expansion.hosts.contains(&"10.0.0.0".to_owned()));
        assert!(!expansion.hosts.contains(&"10.0.0.255".to_owned()));
        assert!(!expansion.hosts.contains(&"10.0.0.5".to_owned()));
    }

    #[test]
    fn same_network_expands_once() {
        let expansion = expand(&ips(&["10.0.0.5", "10.0.0.9", "10.0.0/24"]), 24);

        assert_eq!(expansion.networks, ["10.0.0/24"]);
        assert_eq!(expansion.hosts.len(), 252);
    }

    #[test]
    fn coarse_mask_splits_into_22_blocks() {
        let expansion = expand(&ips(&["172.16.5.1"]), 20);
        assert_eq!(expansion.networks.len(), 1);

        let expansion = expand(&ips(&["172.16.5.1"]), 18);
        assert_eq!(
            expansion.networks,
            [
                "172.16.5/18",
                "172.16.0.0/22",
                "172.16.4.0/22",
                "172.16.8.0/22",
                "172.16.12.0/22",
                "172.16.16.0/22",
                "172.16.20.0/22",
                "172.16.24.0/22",
                "172.16.28.0/22",
                "172.16.32.0/22",
                "172.16.36.0/22",
                "172.16.40.0/22",
                "172.16.44.0/22",
                "172.16.48.0/22",
                "172.16.52.0/22",
                "172.16.56.0/22",
                "172.16.60.0/22",
            ]
        );
        // Whole /18, block boundaries included, minus the input address.
        assert_eq!(expansion.hosts.len(), 16 * 1024 - 1);
    }

    #[test]
    fn ipv6_is_not_expanded() {
        assert_eq!(expand(&ips(&["::1"]), 24), SubnetExpansion::default());
    }
}
