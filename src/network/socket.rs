// SPDX-License-Identifier: PMPL-1.0-or-later

//! Raw link-layer socket for ARP (Linux `AF_PACKET`).

use std::time::Instant;

use super::arp::ArpTransport;
use crate::error::Result;

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::CString;
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Instant;

    use super::super::arp::ETHERTYPE_ARP;
    use super::super::MacAddr;
    use crate::error::{Result, TriageError};

    const MAX_FRAME: usize = 1514;

    pub struct PacketSocket {
        fd: OwnedFd,
        ifindex: i32,
    }

    fn os_error(context: &str) -> TriageError {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => {
                TriageError::PermissionDenied(format!("{context}: {err}"))
            }
            _ => TriageError::network(format!("{context}: {err}")),
        }
    }

    fn link_address(ifindex: i32, destination: Option<MacAddr>) -> libc::sockaddr_ll {
        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = ETHERTYPE_ARP.to_be();
        addr.sll_ifindex = ifindex;
        if let Some(mac) = destination {
            addr.sll_halen = 6;
            addr.sll_addr[..6].copy_from_slice(&mac.octets());
        }
        addr
    }

    fn open_raw() -> Result<OwnedFd> {
        // SAFETY: plain syscall; the returned descriptor is checked below.
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                i32::from(ETHERTYPE_ARP.to_be()),
            )
        };
        if fd < 0 {
            return Err(os_error("cannot open packet socket"));
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    impl PacketSocket {
        pub fn open(interface: &str) -> Result<Self> {
            let name = CString::new(interface)
                .map_err(|_| TriageError::validation(format!("bad interface name {interface:?}")))?;
            // SAFETY: `name` is a valid NUL-terminated string.
            let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if ifindex == 0 {
                return Err(TriageError::network(format!("unknown interface {interface}")));
            }
            let ifindex = ifindex as i32;

            let fd = open_raw()?;
            let addr = link_address(ifindex, None);
            // SAFETY: `addr` outlives the call and the length matches its type.
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(os_error("cannot bind packet socket"));
            }

            Ok(Self { fd, ifindex })
        }

        pub fn send(&mut self, frame: &[u8]) -> Result<()> {
            let addr = link_address(self.ifindex, Some(MacAddr::BROADCAST));
            // SAFETY: buffer and address are valid for the duration of the call.
            let sent = unsafe {
                libc::sendto(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(os_error("sendto failed"));
            }
            Ok(())
        }

        pub fn recv_until(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }

                let mut pollfd = libc::pollfd {
                    fd: self.fd.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                };
                let millis = remaining.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
                // SAFETY: one valid pollfd.
                let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
                if ready < 0 {
                    if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(os_error("poll failed"));
                }
                if ready == 0 {
                    return Ok(None);
                }

                let mut buf = vec![0u8; MAX_FRAME];
                // SAFETY: `buf` is writable for `buf.len()` bytes.
                let n = unsafe {
                    libc::recv(
                        self.fd.as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                    )
                };
                if n < 0 {
                    if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(os_error("recv failed"));
                }
                buf.truncate(n as usize);
                return Ok(Some(buf));
            }
        }
    }

    pub fn has_raw_socket_privilege() -> bool {
        open_raw().is_ok()
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::time::Instant;

    use crate::error::{Result, TriageError};

    pub struct PacketSocket;

    impl PacketSocket {
        pub fn open(_interface: &str) -> Result<Self> {
            Err(TriageError::PermissionDenied(
                "raw ARP is only implemented on Linux".into(),
            ))
        }

        pub fn send(&mut self, _frame: &[u8]) -> Result<()> {
            Err(TriageError::network("packet socket unavailable"))
        }

        pub fn recv_until(&mut self, _deadline: Instant) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    pub fn has_raw_socket_privilege() -> bool {
        false
    }
}

pub use imp::{has_raw_socket_privilege, PacketSocket};

impl ArpTransport for PacketSocket {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        PacketSocket::send(self, frame)
    }

    fn recv_until(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        PacketSocket::recv_until(self, deadline)
    }
}

