//! Raw ICMPv4 socket session for a single probe
//!
//! Each probe opens its own raw socket bound to the resolved source address,
//! applies ToS at open, and optionally sets the DF bit. Sends attach an
//! explicit egress interface index where the platform supports it, and
//! receives carry a hard deadline so a silent destination cannot stall a
//! probe past its timeout.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::probe::interface::InterfaceInfo;

/// Largest IPv4 datagram; replies are read into a buffer of this size
pub const MAX_DATAGRAM: usize = 65535;

/// Outcome of a single receive attempt
#[derive(Debug)]
pub enum RecvOutcome {
    /// A datagram arrived before the deadline
    Data { len: usize, peer: Ipv4Addr },
    /// The deadline passed without a datagram
    DeadlineExpired,
}

/// One raw ICMPv4 socket, configured for a single probe
#[derive(Debug)]
pub struct ProbeSession {
    socket: Socket,
    interface: InterfaceInfo,
    source: Ipv4Addr,
}

impl ProbeSession {
    /// Open a raw ICMPv4 socket bound to `source`, with `tos` applied.
    ///
    /// When `set_df` is true the DF bit is requested best-effort; a platform
    /// that refuses the option gets a warning on stderr and the session
    /// proceeds without it.
    pub fn open(
        interface: &InterfaceInfo,
        source: Ipv4Addr,
        tos: u8,
        set_df: bool,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("failed to create raw ICMP socket (requires root or CAP_NET_RAW)")?;

        socket.set_nonblocking(false)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(source, 0));
        socket
            .bind(&SockAddr::from(bind_addr))
            .with_context(|| format!("failed to bind to source address {}", source))?;

        socket
            .set_tos(tos as u32)
            .with_context(|| format!("failed to set ToS value {}", tos))?;

        if set_df {
            if let Err(e) = set_dont_fragment(&socket) {
                eprintln!("Warning: could not set DF bit: {}", e);
            }
        }

        Ok(Self {
            socket,
            interface: interface.clone(),
            source,
        })
    }

    pub fn source(&self) -> Ipv4Addr {
        self.source
    }

    pub fn interface(&self) -> &InterfaceInfo {
        &self.interface
    }

    /// Send an encoded ICMP message to `dest`, steering it out the session's
    /// interface. Returns the number of bytes transmitted.
    #[cfg(target_os = "linux")]
    pub fn send(&self, message: &[u8], dest: Ipv4Addr) -> Result<usize> {
        use std::os::unix::io::AsRawFd;

        // IP_PKTINFO carries the egress interface index and the source
        // address the kernel should use for this datagram.
        let mut dest_addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        dest_addr.sin_family = libc::AF_INET as libc::sa_family_t;
        dest_addr.sin_addr.s_addr = u32::from(dest).to_be();

        let mut iov = libc::iovec {
            iov_base: message.as_ptr() as *mut libc::c_void,
            iov_len: message.len(),
        };

        let cmsg_space =
            unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::in_pktinfo>() as u32) } as usize;
        let mut cmsg_buf = vec![0u8; cmsg_space];

        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = &mut dest_addr as *mut _ as *mut libc::c_void;
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.len() as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IP;
            (*cmsg).cmsg_type = libc::IP_PKTINFO;
            (*cmsg).cmsg_len =
                libc::CMSG_LEN(std::mem::size_of::<libc::in_pktinfo>() as u32) as _;

            let mut pktinfo: libc::in_pktinfo = std::mem::zeroed();
            pktinfo.ipi_ifindex = self.interface.index as libc::c_int;
            pktinfo.ipi_spec_dst.s_addr = u32::from(self.source).to_be();
            std::ptr::copy_nonoverlapping(
                &pktinfo as *const _ as *const u8,
                libc::CMSG_DATA(cmsg),
                std::mem::size_of::<libc::in_pktinfo>(),
            );
        }

        let sent = unsafe { libc::sendmsg(self.socket.as_raw_fd(), &msg, 0) };
        if sent < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to send ICMP message to {}", dest));
        }
        Ok(sent as usize)
    }

    /// Send an encoded ICMP message to `dest`. The socket's source-address
    /// bind determines the egress path here.
    #[cfg(not(target_os = "linux"))]
    pub fn send(&self, message: &[u8], dest: Ipv4Addr) -> Result<usize> {
        let addr = SocketAddr::V4(SocketAddrV4::new(dest, 0));
        let sent = self
            .socket
            .send_to(message, &SockAddr::from(addr))
            .with_context(|| format!("failed to send ICMP message to {}", dest))?;
        Ok(sent)
    }

    /// Receive one datagram into `buf`, giving up at `deadline`.
    ///
    /// Deadline expiry is an ordinary outcome, not an error; only genuine
    /// I/O failures return `Err`.
    pub fn recv_deadline(&self, buf: &mut [u8], deadline: Instant) -> Result<RecvOutcome> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(RecvOutcome::DeadlineExpired);
        }
        // Zero read timeout means block forever, so clamp to 1ms
        self.socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

        match recv_from_v4(&self.socket, buf) {
            Ok((len, peer)) => Ok(RecvOutcome::Data { len, peer }),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(RecvOutcome::DeadlineExpired)
            }
            Err(e) => Err(e).context("failed to receive ICMP reply"),
        }
    }
}

#[cfg(unix)]
fn recv_from_v4(socket: &Socket, buf: &mut [u8]) -> std::io::Result<(usize, Ipv4Addr)> {
    use std::os::unix::io::AsRawFd;

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let len = unsafe {
        libc::recvfrom(
            socket.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut addr_len,
        )
    };
    if len < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let peer = if storage.ss_family as libc::c_int == libc::AF_INET {
        let addr: &libc::sockaddr_in = unsafe { &*(&storage as *const _ as *const _) };
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr))
    } else {
        Ipv4Addr::UNSPECIFIED
    };

    Ok((len as usize, peer))
}

/// Request the DF bit on every datagram this socket sends.
///
/// Linux has no direct DF flag; IP_MTU_DISCOVER with IP_PMTUDISC_DO makes
/// the kernel set DF and refuse to fragment.
#[cfg(target_os = "linux")]
pub fn set_dont_fragment(socket: &Socket) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // IP_MTU_DISCOVER = 10, IP_PMTUDISC_DO = 2 on Linux
    const IP_MTU_DISCOVER: libc::c_int = 10;
    const IP_PMTUDISC_DO: libc::c_int = 2;
    let val: libc::c_int = IP_PMTUDISC_DO;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            IP_MTU_DISCOVER,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Request the DF bit on every datagram this socket sends (macOS).
#[cfg(target_os = "macos")]
pub fn set_dont_fragment(socket: &Socket) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // IP_DONTFRAG = 28 on macOS
    const IP_DONTFRAG: libc::c_int = 28;
    let val: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            IP_DONTFRAG,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn set_dont_fragment(_socket: &Socket) -> Result<()> {
    Err(anyhow::anyhow!("DF bit is not supported on this platform"))
}
