//! Multicast Sockets
//!
//! Socket setup for the heartbeat group: a receiver that hears every
//! heartbeat on the group (our own included) and a sender that advertises
//! on it from the configured interface.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

/// Anything the watcher can read heartbeat datagrams from
pub trait HeartbeatSource: Send {
    /// Blocking receive of one datagram.
    ///
    /// A `WouldBlock` or `TimedOut` error means the poll window elapsed
    /// with no traffic.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Anything the emitter can write heartbeat datagrams to
pub trait HeartbeatSink: Send {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;
}

/// True if a receive error is the poll timeout rather than a failure
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn setup_error(address: impl ToString, stage: &str, e: io::Error) -> Error {
    Error::SocketSetup {
        address: address.to_string(),
        reason: format!("{}: {}", stage, e),
    }
}

/// Receiving side of the heartbeat group
#[derive(Debug)]
pub struct MulticastReceiver {
    socket: UdpSocket,
}

impl MulticastReceiver {
    /// Join `group` on `interface`, bind `group:port` and arm the poll timeout
    pub fn join(group: Ipv4Addr, port: u16, interface: Ipv4Addr, poll_timeout: Duration) -> Result<Self> {
        let address = SocketAddrV4::new(group, port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| setup_error(address, "create socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| setup_error(address, "enable SO_REUSEADDR", e))?;

        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket
            .set_reuse_port(true)
            .map_err(|e| setup_error(address, "enable SO_REUSEPORT", e))?;

        socket
            .join_multicast_v4(&group, &interface)
            .map_err(|e| setup_error(address, "join multicast group", e))?;

        // We must hear our own heartbeats to crown ourselves
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| setup_error(address, "enable multicast loopback", e))?;

        // Binding the group address filters out unrelated traffic on the port
        #[cfg(unix)]
        let bind_address = address;
        #[cfg(not(unix))]
        let bind_address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);

        socket
            .bind(&SocketAddr::V4(bind_address).into())
            .map_err(|e| setup_error(address, "bind", e))?;

        socket
            .set_read_timeout(Some(poll_timeout))
            .map_err(|e| setup_error(address, "set receive timeout", e))?;

        tracing::debug!(
            "Joined multicast group {} on interface {} (poll timeout {:?})",
            address,
            interface,
            poll_timeout
        );

        Ok(Self { socket: socket.into() })
    }

    /// Local address the receiver is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl HeartbeatSource for MulticastReceiver {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, src) = self.socket.recv_from(buf)?;
        tracing::trace!("Received {} byte datagram from {}", len, src);
        Ok(len)
    }
}

/// Sending side of the heartbeat group
#[derive(Debug)]
pub struct MulticastSender {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl MulticastSender {
    /// Bind an ephemeral port on `interface` and aim it at `group:port`
    pub fn connect(group: Ipv4Addr, port: u16, interface: Ipv4Addr, ttl: u32) -> Result<Self> {
        let destination = SocketAddrV4::new(group, port);

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| setup_error(destination, "create socket", e))?;

        if !interface.is_unspecified() {
            socket
                .set_multicast_if_v4(&interface)
                .map_err(|e| setup_error(destination, "select multicast interface", e))?;
        }

        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| setup_error(destination, "enable multicast loopback", e))?;

        socket
            .set_multicast_ttl_v4(ttl)
            .map_err(|e| setup_error(destination, "set multicast ttl", e))?;

        socket
            .bind(&SocketAddr::V4(SocketAddrV4::new(interface, 0)).into())
            .map_err(|e| setup_error(destination, "bind sender", e))?;

        Ok(Self {
            socket: socket.into(),
            destination,
        })
    }
}

impl HeartbeatSink for MulticastSender {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.destination)?;
        Ok(())
    }
}
