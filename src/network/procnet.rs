// SPDX-License-Identifier: PMPL-1.0-or-later

//! Readers for `/proc/net` tables.
//!
//! All readers take the procfs root so tests can point them at a fabricated
//! tree.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::MacAddr;
use crate::error::Result;

/// ATF_COM: the kernel has a resolved hardware address for the entry.
const ATF_COM: u32 = 0x2;

/// An entry of the kernel ARP cache (`/proc/net/arp`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub device: String,
}

/// Resolved entries of the kernel neighbor cache.
pub fn read_neighbors(proc_root: &Path) -> Result<Vec<Neighbor>> {
    let content = fs::read_to_string(proc_root.join("net/arp"))?;
    Ok(content.lines().skip(1).filter_map(parse_neighbor).collect())
}

fn parse_neighbor(line: &str) -> Option<Neighbor> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).ok()?;
    let mac: MacAddr = fields[3].parse().ok()?;
    if flags & ATF_COM == 0 || mac.is_zero() {
        return None;
    }
    Some(Neighbor {
        ip: fields[0].parse().ok()?,
        mac,
        device: fields[5].to_string(),
    })
}

/// Per-interface traffic counters (`/proc/net/dev`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub bytes_recv: u64,
    pub packets_recv: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
}

pub fn read_interface_counters(proc_root: &Path) -> Result<Vec<InterfaceCounters>> {
    let content = fs::read_to_string(proc_root.join("net/dev"))?;
    Ok(content.lines().skip(2).filter_map(parse_dev_line).collect())
}

fn parse_dev_line(line: &str) -> Option<InterfaceCounters> {
    let (name, rest) = line.split_once(':')?;
    let values: Vec<u64> = rest
        .split_whitespace()
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    if values.len() < 10 {
        return None;
    }
    Some(InterfaceCounters {
        name: name.trim().to_string(),
        bytes_recv: values[0],
        packets_recv: values[1],
        bytes_sent: values[8],
        packets_sent: values[9],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketKind {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketFamily {
    Inet,
    Inet6,
}

/// One row of `/proc/net/{tcp,tcp6,udp,udp6}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub kind: SocketKind,
    pub family: SocketFamily,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub status: &'static str,
    pub inode: u64,
}

/// Every socket of the given kind and family. A missing table (no IPv6,
/// say) is an empty list.
pub fn read_socket_table(
    proc_root: &Path,
    kind: SocketKind,
    family: SocketFamily,
) -> Result<Vec<SocketEntry>> {
    let name = match (kind, family) {
        (SocketKind::Tcp, SocketFamily::Inet) => "tcp",
        (SocketKind::Tcp, SocketFamily::Inet6) => "tcp6",
        (SocketKind::Udp, SocketFamily::Inet) => "udp",
        (SocketKind::Udp, SocketFamily::Inet6) => "udp6",
    };
    let path = proc_root.join("net").join(name);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .skip(1)
        .filter_map(|line| parse_socket_line(line, kind, family))
        .collect())
}

fn parse_socket_line(line: &str, kind: SocketKind, family: SocketFamily) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let local = parse_hex_endpoint(fields[1], family)?;
    let remote = parse_hex_endpoint(fields[2], family)?;
    let status = match kind {
        SocketKind::Tcp => tcp_state(fields[3]),
        SocketKind::Udp => "NONE",
    };
    Some(SocketEntry {
        kind,
        family,
        local,
        remote: (!remote.ip().is_unspecified() || remote.port() != 0).then_some(remote),
        status,
        inode: fields[9].parse().ok()?,
    })
}

/// Decode `0100007F:0050` style endpoints. The kernel prints each 32-bit
/// word of the network-order address as a host-order integer.
fn parse_hex_endpoint(s: &str, family: SocketFamily) -> Option<SocketAddr> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let ip = match family {
        SocketFamily::Inet => {
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        SocketFamily::Inet6 => {
            if addr_hex.len() != 32 {
                return None;
            }
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(addr_hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
    };
    Some(SocketAddr::new(ip, port))
}

fn tcp_state(hex: &str) -> &'static str {
    match hex {
        "01" => "ESTABLISHED",
        "02" => "SYN_SENT",
        "03" => "SYN_RECV",
        "04" => "FIN_WAIT1",
        "05" => "FIN_WAIT2",
        "06" => "TIME_WAIT",
        "07" => "CLOSE",
        "08" => "CLOSE_WAIT",
        "09" => "LAST_ACK",
        "0A" => "LISTEN",
        "0B" => "CLOSING",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc() -> TempDir {
        let dir = TempDir::new().unwrap();
        let net = dir.path().join("net");
        fs::create_dir_all(&net).unwrap();
        fs::write(
            net.join("arp"),
            "IP address       HW type     Flags       HW address            Mask     Device\n\
             192.168.1.1      0x1         0x2         aa:bb:cc:00:00:01     *        eth0\n\
             192.168.1.77     0x1         0x0         00:00:00:00:00:00     *        eth0\n\
             10.0.0.5         0x1         0x2         aa:bb:cc:00:00:05     *        wlan0\n",
        )
        .unwrap();
        fs::write(
            net.join("dev"),
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
             lo:  1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0\n  \
             eth0: 5000      50    0    0    0     0          0         0     2500      25    0    0    0     0       0          0\n",
        )
        .unwrap();
        fs::write(
            net.join("tcp"),
            "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n   \
             0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4242 1 0000000000000000 100 0 0 10 0\n   \
             1: 0A01A8C0:D2F0 0101A8C0:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 4343 1 0000000000000000 20 4 30 10 -1\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_neighbors_skip_incomplete() {
        let proc = fake_proc();
        let neighbors = read_neighbors(proc.path()).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(neighbors[0].mac.to_string(), "aa:bb:cc:00:00:01");
        assert_eq!(neighbors[1].device, "wlan0");
    }

    #[test]
    fn test_interface_counters() {
        let proc = fake_proc();
        let counters = read_interface_counters(proc.path()).unwrap();
        assert_eq!(counters.len(), 2);
        assert_eq!(counters[1].name, "eth0");
        assert_eq!(counters[1].bytes_recv, 5000);
        assert_eq!(counters[1].packets_sent, 25);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_tcp_table() {
        let proc = fake_proc();
        let sockets = read_socket_table(proc.path(), SocketKind::Tcp, SocketFamily::Inet).unwrap();
        assert_eq!(sockets.len(), 2);

        assert_eq!(sockets[0].local, "127.0.0.1:3306".parse().unwrap());
        assert_eq!(sockets[0].status, "LISTEN");
        assert!(sockets[0].remote.is_none());
        assert_eq!(sockets[0].inode, 4242);

        assert_eq!(sockets[1].local, "192.168.1.10:54000".parse().unwrap());
        assert_eq!(sockets[1].remote, Some("192.168.1.1:443".parse().unwrap()));
        assert_eq!(sockets[1].status, "ESTABLISHED");
    }

    #[test]
    fn test_missing_table_is_empty() {
        let proc = fake_proc();
        let sockets = read_socket_table(proc.path(), SocketKind::Udp, SocketFamily::Inet6).unwrap();
        assert!(sockets.is_empty());
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_ipv6_endpoint() {
        let addr = parse_hex_endpoint("00000000000000000000000001000000:0050", SocketFamily::Inet6).unwrap();
        assert_eq!(addr, "[::1]:80".parse().unwrap());
    }

    #[test]
    fn test_endpoints_decode_in_host_order() {
        let v4 = format!("{:08X}:01BB", u32::from_ne_bytes([10, 1, 2, 3]));
        let addr = parse_hex_endpoint(&v4, SocketFamily::Inet).unwrap();
        assert_eq!(addr, "10.1.2.3:443".parse().unwrap());

        let ip: Ipv6Addr = "fe80::1:2:3:4".parse().unwrap();
        let v6: String = ip
            .octets()
            .chunks_exact(4)
            .map(|c| format!("{:08X}", u32::from_ne_bytes([c[0], c[1], c[2], c[3]])))
            .collect();
        let addr = parse_hex_endpoint(&format!("{v6}:0016"), SocketFamily::Inet6).unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V6(ip), 22));
    }
}
