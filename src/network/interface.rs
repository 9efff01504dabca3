// SPDX-License-Identifier: PMPL-1.0-or-later

//! Local interface discovery and selection for ARP scans.

use std::net::{IpAddr, Ipv4Addr};

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{MacAddr, ScanTarget};
use crate::error::{Result, TriageError};

/// Interface name prefixes never chosen as a fallback.
const VIRTUAL_PREFIXES: &[&str] = &["lo", "docker", "veth", "br-", "virbr"];

/// One IPv4 address bound to a local interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInterface {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
    pub mac: Option<MacAddr>,
}

impl LocalInterface {
    pub fn is_loopback(&self) -> bool {
        self.ipv4.is_loopback()
    }

    fn is_virtual(&self) -> bool {
        VIRTUAL_PREFIXES.iter().any(|p| self.name.starts_with(p))
    }
}

/// IPv4 addresses of every local interface.
pub fn list_interfaces() -> Result<Vec<LocalInterface>> {
    let interfaces =
        NetworkInterface::show().map_err(|e| TriageError::network(format!("{e}")))?;

    let mut found = Vec::new();
    for interface in interfaces {
        let mac = interface
            .mac_addr
            .as_deref()
            .and_then(|m| m.parse::<MacAddr>().ok())
            .filter(|m| !m.is_zero());
        for addr in &interface.addr {
            if let Addr::V4(v4) = addr {
                found.push(LocalInterface {
                    name: interface.name.clone(),
                    ipv4: v4.ip,
                    netmask: v4.netmask,
                    mac,
                });
            } else if let IpAddr::V6(ip) = addr.ip() {
                debug!("Skipping IPv6 address {ip} on {}", interface.name);
            }
        }
    }
    Ok(found)
}

/// Pick the interface to scan `target` from.
///
/// An explicitly configured interface wins. Otherwise the first interface
/// with an address inside the target, then the first physical-looking
/// interface with a usable address.
pub fn select_interface<'a>(
    interfaces: &'a [LocalInterface],
    target: &ScanTarget,
    preferred: Option<&str>,
) -> Option<&'a LocalInterface> {
    if let Some(name) = preferred {
        let chosen = interfaces.iter().find(|i| i.name == name);
        if chosen.is_none() {
            warn!("Configured interface {name} has no IPv4 address");
        }
        return chosen;
    }

    if let Some(inside) = interfaces.iter().find(|i| target.contains(i.ipv4)) {
        info!("Selected interface: {} (IP: {})", inside.name, inside.ipv4);
        return Some(inside);
    }

    let fallback = interfaces
        .iter()
        .find(|i| !i.is_virtual() && !i.is_loopback() && !i.ipv4.is_unspecified());
    match fallback {
        Some(i) => info!("Using fallback interface: {} (IP: {})", i.name, i.ipv4),
        None => warn!("No suitable network interface found for ARP operations"),
    }
    fallback
}
