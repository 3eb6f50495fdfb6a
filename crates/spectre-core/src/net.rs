//! Local network interface helpers

use std::net::IpAddr;

use if_addrs::{get_if_addrs, Interface};
use spectre_protocol::NetworkInfo;

fn interfaces() -> Vec<Interface> {
    match get_if_addrs() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            tracing::debug!("Failed to enumerate network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// First IPv4 address bound to a non-loopback interface
pub fn first_non_loopback_ipv4() -> Option<String> {
    interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => Some(ip.to_string()),
            _ => None,
        })
}

/// IPv4/IPv6 addresses of every non-loopback interface
pub fn collect_network_info() -> NetworkInfo {
    let mut info = NetworkInfo::default();
    for iface in interfaces() {
        if iface.is_loopback() {
            continue;
        }
        match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() => info.ipv4.push(ip.to_string()),
            IpAddr::V6(ip) if !ip.is_loopback() => info.ipv6.push(ip.to_string()),
            _ => {}
        }
    }
    info
}

/// Names of all interfaces that carry at least one address, deduplicated
pub fn interface_names() -> Vec<String> {
    let mut names: Vec<String> = interfaces().into_iter().map(|iface| iface.name).collect();
    names.sort();
    names.dedup();
    names
}
