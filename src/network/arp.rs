// SPDX-License-Identifier: PMPL-1.0-or-later

//! ARP over Ethernet: frame encoding, decoding and the request sweep.

use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::MacAddr;
use crate::error::Result;

pub const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV4: u16 = 0x0800;
const HTYPE_ETHERNET: u16 = 1;

const ETH_HEADER_LEN: usize = 14;
const ARP_PAYLOAD_LEN: usize = 28;
/// Minimum Ethernet frame size without FCS; shorter frames are padded.
pub const MIN_FRAME_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
}

impl ArpOperation {
    fn code(self) -> u16 {
        match self {
            ArpOperation::Request => 1,
            ArpOperation::Reply => 2,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(ArpOperation::Request),
            2 => Some(ArpOperation::Reply),
            _ => None,
        }
    }
}

/// An IPv4-over-Ethernet ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOperation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// "Who has `target_ip`? Tell `sender_ip`."
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply_to(&self, responder_mac: MacAddr) -> Self {
        Self {
            operation: ArpOperation::Reply,
            sender_mac: responder_mac,
            sender_ip: self.target_ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Encode as an Ethernet frame. Requests go to the broadcast address.
    pub fn to_frame(&self) -> Vec<u8> {
        let destination = match self.operation {
            ArpOperation::Request => MacAddr::BROADCAST,
            ArpOperation::Reply => self.target_mac,
        };

        let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
        frame.extend_from_slice(&destination.octets());
        frame.extend_from_slice(&self.sender_mac.octets());
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());

        frame.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.push(6);
        frame.push(4);
        frame.extend_from_slice(&self.operation.code().to_be_bytes());
        frame.extend_from_slice(&self.sender_mac.octets());
        frame.extend_from_slice(&self.sender_ip.octets());
        frame.extend_from_slice(&self.target_mac.octets());
        frame.extend_from_slice(&self.target_ip.octets());

        frame.resize(MIN_FRAME_LEN, 0);
        frame
    }

    /// Decode an Ethernet frame. Anything that is not IPv4-over-Ethernet
    /// ARP yields `None`.
    pub fn parse_frame(frame: &[u8]) -> Option<Self> {
        if frame.len() < ETH_HEADER_LEN + ARP_PAYLOAD_LEN {
            return None;
        }
        if be16(frame, 12) != ETHERTYPE_ARP {
            return None;
        }

        let arp = &frame[ETH_HEADER_LEN..];
        if be16(arp, 0) != HTYPE_ETHERNET || be16(arp, 2) != ETHERTYPE_IPV4 {
            return None;
        }
        if arp[4] != 6 || arp[5] != 4 {
            return None;
        }

        Some(Self {
            operation: ArpOperation::from_code(be16(arp, 6))?,
            sender_mac: mac_at(arp, 8),
            sender_ip: ipv4_at(arp, 14),
            target_mac: mac_at(arp, 18),
            target_ip: ipv4_at(arp, 24),
        })
    }
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn mac_at(buf: &[u8], at: usize) -> MacAddr {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&buf[at..at + 6]);
    MacAddr(octets)
}

fn ipv4_at(buf: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[at], buf[at + 1], buf[at + 2], buf[at + 3])
}

/// A link-layer channel able to carry ARP frames.
pub trait ArpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Next received frame, or `None` once `deadline` has passed.
    fn recv_until(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>>;
}

/// Broadcast one request per target and collect replies until `timeout`.
///
/// Only replies addressed to `sender_ip` from a requested address count.
pub fn sweep<T: ArpTransport + ?Sized>(
    transport: &mut T,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    targets: &[Ipv4Addr],
    timeout: Duration,
) -> Result<BTreeMap<Ipv4Addr, MacAddr>> {
    let wanted: HashSet<Ipv4Addr> = targets.iter().copied().collect();

    for target in targets {
        trace!("who-has {target} tell {sender_ip}");
        transport.send(&ArpPacket::request(sender_mac, sender_ip, *target).to_frame())?;
    }

    let deadline = Instant::now() + timeout;
    let mut answered = BTreeMap::new();
    while let Some(frame) = transport.recv_until(deadline)? {
        let Some(packet) = ArpPacket::parse_frame(&frame) else {
            continue;
        };
        if packet.operation != ArpOperation::Reply
            || packet.target_ip != sender_ip
            || !wanted.contains(&packet.sender_ip)
        {
            continue;
        }
        debug!("{} is at {}", packet.sender_ip, packet.sender_mac);
        answered.insert(packet.sender_ip, packet.sender_mac);
        if answered.len() == wanted.len() {
            break;
        }
    }

    Ok(answered)
}
