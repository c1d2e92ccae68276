//! Host address discovery

use std::net::{IpAddr, Ipv6Addr};

use ipnet::Ipv6Net;

/// Loopback address in the same family as `node`
pub fn localhost_address(node: IpAddr) -> &'static str {
    match node {
        IpAddr::V4(_) => "127.0.0.1",
        IpAddr::V6(_) => "::1",
    }
}

/// Interface carrying the IPv6 default route, from `/proc/net/ipv6_route`
pub fn default_route_ipv6_interface(ipv6_route: &str) -> Option<String> {
    ipv6_route.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            return None;
        }
        let destination = fields[0];
        let prefix = fields[1];
        let ifname = fields[9];
        let is_default = destination.chars().all(|c| c == '0') && prefix == "00";
        (is_default && ifname != "lo").then(|| ifname.to_string())
    })
}

/// Network containing the first global-scope address of `ifname`, from
/// `/proc/net/if_inet6`
pub fn global_ipv6_network(if_inet6: &str, ifname: &str) -> Option<Ipv6Net> {
    if_inet6.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || fields[5] != ifname {
            return None;
        }
        // Scope 00 is global
        if u8::from_str_radix(fields[3], 16).ok()? != 0 {
            return None;
        }
        let address = parse_hex_ipv6(fields[0])?;
        let prefix_len = u8::from_str_radix(fields[2], 16).ok()?;
        Ipv6Net::new(address, prefix_len).ok().map(|net| net.trunc())
    })
}

fn parse_hex_ipv6(hex: &str) -> Option<Ipv6Addr> {
    if hex.len() != 32 {
        return None;
    }
    u128::from_str_radix(hex, 16).ok().map(Ipv6Addr::from)
}
