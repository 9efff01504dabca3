// SPDX-License-Identifier: PMPL-1.0-or-later

//! Local network discovery.
//!
//! With raw-socket privilege an ARP request is broadcast to every host of
//! the target range. Without it the analyzer falls back to what the kernel
//! already knows: local interface addresses and the neighbor cache.

pub mod arp;
pub mod interface;
pub mod procnet;
pub mod socket;

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{error, info, warn};

use crate::config::NetworkConfig;
use crate::error::{Result, TriageError};
use crate::retry::RetryPolicy;

pub use arp::{ArpPacket, ArpTransport};
pub use interface::LocalInterface;

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TriageError::validation(format!("invalid MAC address: {s}"));
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An IPv4 range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTarget {
    network: Ipv4Addr,
    prefix: u8,
}

impl ScanTarget {
    /// Ranges wider than this are refused; a /16 is already 65k requests.
    pub const MIN_PREFIX: u8 = 16;

    /// Parse `a.b.c.d` or `a.b.c.d/p`. Host bits are cleared.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TriageError::validation("empty scan target"));
        }
        let (ip, prefix) = match s.split_once('/') {
            Some((ip, prefix)) => (
                ip,
                prefix
                    .parse::<u8>()
                    .ok()
                    .filter(|p| *p <= 32)
                    .ok_or_else(|| TriageError::validation(format!("invalid prefix in {s}")))?,
            ),
            None => (s, 32),
        };
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| TriageError::validation(format!("invalid IPv4 address in {s}")))?;
        if prefix < Self::MIN_PREFIX {
            return Err(TriageError::validation(format!(
                "target {s} is wider than /{}",
                Self::MIN_PREFIX
            )));
        }

        Ok(Self {
            network: Ipv4Addr::from(u32::from(ip) & Self::mask(prefix)),
            prefix,
        })
    }

    fn mask(prefix: u8) -> u32 {
        match prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask(self.prefix) == u32::from(self.network)
    }

    /// Host addresses; network and broadcast are excluded below /31.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network);
        let last = first | !Self::mask(self.prefix);
        let (start, end) = if self.prefix >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (start..=end).map(Ipv4Addr::from)
    }

    pub fn host_count(&self) -> usize {
        match self.prefix {
            32 => 1,
            31 => 2,
            p => (1usize << (32 - p)) - 2,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// ARP requests were broadcast.
    Active,
    /// No raw-socket privilege; only kernel state was read.
    Limited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSource {
    ArpReply,
    LocalInterface,
    NeighborCache,
}

/// One discovered host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddr>,
    pub source: HostSource,
    pub timestamp: String,
}

impl HostRecord {
    fn new(ip: Ipv4Addr, mac: Option<MacAddr>, source: HostSource) -> Self {
        Self {
            ip,
            mac,
            source,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpScanResult {
    pub target: String,
    pub mode: ScanMode,
    pub interface: Option<String>,
    /// Keyed by the host's IP address.
    pub hosts: BTreeMap<Ipv4Addr, HostRecord>,
    pub scan_time: String,
}

impl ArpScanResult {
    fn empty(target: &str, mode: ScanMode) -> Self {
        Self {
            target: target.to_string(),
            mode,
            interface: None,
            hosts: BTreeMap::new(),
            scan_time: Utc::now().to_rfc3339(),
        }
    }
}

/// Traffic totals and active interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub scan_time: String,
    pub interfaces: Vec<String>,
}

pub struct NetworkAnalyzer {
    config: NetworkConfig,
    proc_root: PathBuf,
    retry: RetryPolicy,
}

impl NetworkAnalyzer {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            config: config.clone(),
            proc_root: PathBuf::from("/proc"),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn with_proc_root(mut self, root: impl AsRef<Path>) -> Self {
        self.proc_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.timeout_secs)
    }

    /// Discover hosts in `target`.
    ///
    /// An empty target is logged and yields an empty result. Lacking
    /// raw-socket privilege switches to limited mode instead of failing.
    pub fn perform_arp_scan(&self, target: &str, timeout: Duration) -> Result<ArpScanResult> {
        if target.trim().is_empty() {
            error!("Target IP range cannot be empty");
            return Ok(ArpScanResult::empty(target, ScanMode::Limited));
        }
        let range = ScanTarget::parse(target)?;
        info!("Starting ARP scan on {range}");

        let interfaces = interface::list_interfaces()?;
        let chosen = interface::select_interface(
            &interfaces,
            &range,
            self.config.interface.as_deref(),
        );

        let Some(chosen) = chosen else {
            warn!("No interface available for ARP; using kernel state only");
            return self.limited_scan(&interfaces, &range);
        };

        match socket::PacketSocket::open(&chosen.name) {
            Ok(mut transport) => {
                let mut result = ArpScanResult::empty(&range.to_string(), ScanMode::Active);
                result.interface = Some(chosen.name.clone());
                result.hosts = self.arp_sweep(&mut transport, chosen, &range, timeout)?;
                info!("ARP scan completed. Found {} hosts", result.hosts.len());
                Ok(result)
            }
            Err(e) if e.is_permission_error() => {
                warn!("Insufficient privileges for ARP scan ({e}); running limited scan");
                let mut result = self.limited_scan(&interfaces, &range)?;
                result.interface = Some(chosen.name.clone());
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep `target` over `transport`, retrying transient failures.
    pub fn arp_sweep<T: ArpTransport + ?Sized>(
        &self,
        transport: &mut T,
        local: &LocalInterface,
        target: &ScanTarget,
        timeout: Duration,
    ) -> Result<BTreeMap<Ipv4Addr, HostRecord>> {
        let mac = local.mac.ok_or_else(|| {
            TriageError::network(format!("interface {} has no hardware address", local.name))
        })?;
        let hosts: Vec<Ipv4Addr> = target.hosts().filter(|ip| *ip != local.ipv4).collect();

        let answered = self.retry.run("ARP sweep", |_| {
            arp::sweep(&mut *transport, mac, local.ipv4, &hosts, timeout)
        })?;

        let mut found: BTreeMap<Ipv4Addr, HostRecord> = answered
            .into_iter()
            .map(|(ip, mac)| (ip, HostRecord::new(ip, Some(mac), HostSource::ArpReply)))
            .collect();
        if target.contains(local.ipv4) {
            found.insert(
                local.ipv4,
                HostRecord::new(local.ipv4, Some(mac), HostSource::LocalInterface),
            );
        }
        Ok(found)
    }

    /// Hosts known without sending anything: local addresses inside the
    /// range and resolved neighbor-cache entries.
    pub fn limited_scan(
        &self,
        interfaces: &[LocalInterface],
        target: &ScanTarget,
    ) -> Result<ArpScanResult> {
        let mut result = ArpScanResult::empty(&target.to_string(), ScanMode::Limited);

        for local in interfaces.iter().filter(|i| target.contains(i.ipv4)) {
            result.hosts.insert(
                local.ipv4,
                HostRecord::new(local.ipv4, None, HostSource::LocalInterface),
            );
        }

        match procnet::read_neighbors(&self.proc_root) {
            Ok(neighbors) => {
                for neighbor in neighbors.into_iter().filter(|n| target.contains(n.ip)) {
                    result.hosts.entry(neighbor.ip).or_insert_with(|| {
                        HostRecord::new(neighbor.ip, Some(neighbor.mac), HostSource::NeighborCache)
                    });
                }
            }
            Err(e) => warn!("Cannot read neighbor cache: {e}"),
        }

        info!("Limited scan found {} hosts", result.hosts.len());
        Ok(result)
    }

    /// Traffic counters summed over all interfaces.
    pub fn network_info(&self) -> Result<NetworkInfo> {
        let counters = procnet::read_interface_counters(&self.proc_root)?;

        let mut interfaces: Vec<String> = match interface::list_interfaces() {
            Ok(list) => list.into_iter().map(|i| i.name).collect(),
            Err(e) => {
                warn!("Cannot list interfaces: {e}");
                counters.iter().map(|c| c.name.clone()).collect()
            }
        };
        interfaces.sort();
        interfaces.dedup();

        Ok(NetworkInfo {
            bytes_sent: counters.iter().map(|c| c.bytes_sent).sum(),
            bytes_recv: counters.iter().map(|c| c.bytes_recv).sum(),
            packets_sent: counters.iter().map(|c| c.packets_sent).sum(),
            packets_recv: counters.iter().map(|c| c.packets_recv).sum(),
            scan_time: Utc::now().to_rfc3339(),
            interfaces,
        })
    }
}
