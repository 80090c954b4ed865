//! Source interface and address resolution for probe sessions
//!
//! The configuration may name an interface, a source address, both, or
//! neither; resolution follows the same four cases in each direction and
//! always produces a concrete (interface, IPv4 source) pair.

use anyhow::{anyhow, Result};
use pnet::datalink;
use std::net::{IpAddr, Ipv4Addr};

/// Fallback when the platform gives no way to read an interface MTU
pub const DEFAULT_MTU: u32 = 1500;

/// Resolved source interface
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "eth0", "lo")
    pub name: String,
    /// Interface index, attached to outgoing messages as the egress hint
    pub index: u32,
    /// Interface MTU, used for DF-bit payload budget warnings
    pub mtu: u32,
    /// First IPv4 address on the interface (if any)
    pub ipv4: Option<Ipv4Addr>,
}

fn first_ipv4(iface: &datalink::NetworkInterface) -> Option<Ipv4Addr> {
    iface.ips.iter().find_map(|addr| match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        _ => None,
    })
}

fn info_from(iface: &datalink::NetworkInterface) -> InterfaceInfo {
    InterfaceInfo {
        name: iface.name.clone(),
        index: iface.index,
        mtu: interface_mtu(&iface.name),
        ipv4: first_ipv4(iface),
    }
}

/// Read an interface MTU from sysfs
#[cfg(target_os = "linux")]
pub fn interface_mtu(name: &str) -> u32 {
    std::fs::read_to_string(format!("/sys/class/net/{}/mtu", name))
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(DEFAULT_MTU)
}

#[cfg(not(target_os = "linux"))]
pub fn interface_mtu(_name: &str) -> u32 {
    DEFAULT_MTU
}

/// Look up an interface by name
pub fn find_by_name(name: &str) -> Result<InterfaceInfo> {
    for iface in datalink::interfaces() {
        if iface.name == name {
            return Ok(info_from(&iface));
        }
    }

    let available: Vec<_> = datalink::interfaces()
        .iter()
        .filter(|i| !i.ips.is_empty())
        .map(|i| i.name.clone())
        .collect();

    Err(anyhow!(
        "interface {:?} not found. Available interfaces: {}",
        name,
        if available.is_empty() {
            "(none with IP addresses)".to_string()
        } else {
            available.join(", ")
        }
    ))
}

/// Resolve the configured interface name and/or source address into a
/// concrete pair.
///
/// - neither given: first interface carrying a non-loopback IPv4, falling
///   back to any interface with an IPv4 address
/// - name only: that interface's first IPv4 address
/// - address only: the interface owning that address
/// - both: verified against each other
pub fn resolve(
    name: Option<&str>,
    source_ip: Option<Ipv4Addr>,
) -> Result<(InterfaceInfo, Ipv4Addr)> {
    match (name, source_ip) {
        (None, None) => {
            let interfaces = datalink::interfaces();
            interfaces
                .iter()
                .find_map(|i| {
                    first_ipv4(i)
                        .filter(|ip| !ip.is_loopback())
                        .map(|ip| (info_from(i), ip))
                })
                .or_else(|| {
                    interfaces
                        .iter()
                        .find_map(|i| first_ipv4(i).map(|ip| (info_from(i), ip)))
                })
                .ok_or_else(|| anyhow!("no network interface with an IPv4 address found"))
        }
        (Some(name), None) => {
            let info = find_by_name(name)?;
            let ip = info
                .ipv4
                .ok_or_else(|| anyhow!("interface {:?} has no IPv4 address", name))?;
            Ok((info, ip))
        }
        (None, Some(ip)) => {
            for iface in datalink::interfaces() {
                if iface.ips.iter().any(|a| a.ip() == IpAddr::V4(ip)) {
                    return Ok((info_from(&iface), ip));
                }
            }
            Err(anyhow!("no network interface found with IP address {}", ip))
        }
        (Some(name), Some(ip)) => {
            let info = find_by_name(name)?;
            let owns = datalink::interfaces()
                .iter()
                .any(|i| i.name == name && i.ips.iter().any(|a| a.ip() == IpAddr::V4(ip)));
            if !owns {
                return Err(anyhow!(
                    "interface {:?} does not carry IP address {}",
                    name,
                    ip
                ));
            }
            Ok((info, ip))
        }
    }
}
