// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction.
//!
//! One uniform interface over connection-oriented (TCP) and connectionless
//! (UDP) transports: a factory ([`Transport`]) creating listeners and
//! connections, addressed by [`Locator`]s. Stream writes are message-atomic
//! with respect to concurrent writers; reads and writes run on non-blocking
//! sockets bounded by the configured timeouts.
//!
//! # Modules
//!
//! - `udp` - connectionless UDPv4 channels
//! - `tcp` - stream transport with the peer-keyed connection cache
//! - `waitset` - mio-backed receive wait-set

/// Stream transport with the peer-keyed connection cache.
pub mod tcp;
/// Connectionless UDP channels.
pub mod udp;
/// Receive wait-set multiplexing sockets onto receive threads.
pub mod waitset;

use std::fmt;
use std::io::IoSlice;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Error, Result};

/// Locator kind discriminants (RTPS vendor values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocatorKind {
    Udpv4 = 1,
    Udpv6 = 2,
    Tcpv4 = 4,
    Tcpv6 = 8,
}

impl LocatorKind {
    /// True for the stream (TCP) kinds.
    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(self, LocatorKind::Tcpv4 | LocatorKind::Tcpv6)
    }
}

/// Transport address: kind, port, and a 16-byte address (IPv4 mapped into the
/// last four bytes, RTPS style).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locator {
    pub kind: LocatorKind,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// Build from a socket address with the given kind.
    #[must_use]
    pub fn from_socket_addr(kind: LocatorKind, addr: &SocketAddr) -> Self {
        let mut address = [0u8; 16];
        match addr.ip() {
            IpAddr::V4(v4) => address[12..16].copy_from_slice(&v4.octets()),
            IpAddr::V6(v6) => address.copy_from_slice(&v6.octets()),
        }
        Self {
            kind,
            port: u32::from(addr.port()),
            address,
        }
    }

    /// Convert back to a socket address.
    #[must_use]
    pub fn to_socket_addr(&self) -> SocketAddr {
        let port = u16::try_from(self.port).unwrap_or(0);
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                let ip = Ipv4Addr::new(
                    self.address[12],
                    self.address[13],
                    self.address[14],
                    self.address[15],
                );
                SocketAddr::new(IpAddr::V4(ip), port)
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.address)), port)
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Udpv6 => "udp",
            LocatorKind::Tcpv4 | LocatorKind::Tcpv6 => "tcp",
        };
        write!(f, "{}/{}", proto, self.to_socket_addr())
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self)
    }
}

/// Thread-safe, deduplicated set of locators describing how to reach a peer.
#[derive(Debug, Default)]
pub struct AddrSet {
    inner: Mutex<std::collections::BTreeSet<Locator>>,
}

impl AddrSet {
    /// Empty address set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a locator; returns false if it was already present.
    pub fn add(&self, loc: Locator) -> bool {
        self.inner.lock().insert(loc)
    }

    /// Remove a locator.
    pub fn remove(&self, loc: &Locator) -> bool {
        self.inner.lock().remove(loc)
    }

    /// Snapshot of the current locators.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Locator> {
        self.inner.lock().iter().copied().collect()
    }

    /// True iff no locator is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Replace the whole set.
    pub fn replace(&self, locs: impl IntoIterator<Item = Locator>) {
        let mut set = self.inner.lock();
        set.clear();
        set.extend(locs);
    }
}

/// Outcome of a connection read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received, with the source locator when the transport knows it.
    Data { len: usize, src: Option<Locator> },
    /// Orderly end of stream.
    Eof,
    /// Nothing available within the poll round (only with `allow_spurious`).
    Spurious,
}

/// A single bidirectional flow: a UDP channel or one TCP connection.
pub trait Connection: Send + Sync {
    /// Read into `buf`. With `allow_spurious`, an empty poll round returns
    /// [`ReadOutcome::Spurious`] instead of an error.
    fn read(&self, buf: &mut [u8], allow_spurious: bool) -> Result<ReadOutcome>;

    /// Write one message to `dst`, atomically with respect to concurrent
    /// writers on the same connection. Returns the bytes written.
    fn write(&self, dst: &Locator, bufs: &[IoSlice<'_>]) -> Result<usize>;

    /// The peer locator, for connection-oriented flows.
    fn peer_locator(&self) -> Option<Locator>;

    /// Locator of the local endpoint.
    fn local_locator(&self) -> Locator;

    /// Close the flow; subsequent reads yield Eof, writes fail.
    fn close(&self);
}

/// A passive stream endpoint accepting inbound connections.
pub trait Listener: Send + Sync {
    /// Block until a peer connects.
    fn accept(&self) -> Result<Arc<dyn Connection>>;

    /// Locator of the listening endpoint.
    fn local_locator(&self) -> Locator;
}

/// Transport factory.
pub trait Transport: Send + Sync {
    /// Locator kind produced and consumed by this transport.
    fn kind(&self) -> LocatorKind;

    /// Stream (connection-oriented) transport?
    fn is_stream(&self) -> bool;

    /// Connectionless transport?
    fn is_connless(&self) -> bool;

    /// Open a receive/send channel bound to `port` (0 picks an ephemeral
    /// port). For stream transports this is the routing connection whose
    /// writes go through the connection cache.
    fn create_conn(&self, port: u16) -> Result<Arc<dyn Connection>>;

    /// Create a listener (stream transports only).
    fn listen(&self, port: u16) -> Result<Box<dyn Listener>>;

    /// Actively connect to a peer (stream transports only).
    fn connect(&self, peer: &Locator) -> Result<Arc<dyn Connection>>;
}

/// Build the transport factory selected by the configuration.
///
/// `ssl_enable` requires the `ssl` feature (the TLS backend is supplied by
/// the embedder); without it the selection fails with `Unsupported`.
pub fn make_transport(cfg: &crate::config::Config) -> Result<Arc<dyn Transport>> {
    use crate::config::TransportSelector;

    if cfg.ssl_enable && !cfg!(feature = "ssl") {
        log::error!("[transport] ssl_enable set but the ssl feature is not compiled in");
        return Err(Error::Unsupported);
    }
    Ok(match cfg.transport_selector {
        TransportSelector::Udp => Arc::new(udp::UdpTransport::new(
            crate::config::RECV_POLL_INTERVAL,
        )),
        TransportSelector::Tcp => Arc::new(tcp::TcpTransport::new(
            LocatorKind::Tcpv4,
            cfg.tcp_read_timeout,
            cfg.tcp_write_timeout,
        )),
        TransportSelector::Tcp6 => Arc::new(tcp::TcpTransport::new(
            LocatorKind::Tcpv6,
            cfg.tcp_read_timeout,
            cfg.tcp_write_timeout,
        )),
    })
}

/// Enumerate default unicast locators for this host.
pub fn default_unicast_locators(kind: LocatorKind, port: u16) -> Vec<Locator> {
    match local_ip_address::local_ip() {
        Ok(ip) => vec![Locator::from_socket_addr(
            kind,
            &SocketAddr::new(ip, port),
        )],
        Err(e) => {
            log::warn!("[transport] no local ip found ({e}), falling back to loopback");
            vec![Locator::from_socket_addr(
                kind,
                &SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            )]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_roundtrip_v4() {
        let addr: SocketAddr = "192.168.1.100:7411".parse().expect("addr");
        let loc = Locator::from_socket_addr(LocatorKind::Udpv4, &addr);
        assert_eq!(loc.port, 7411);
        assert_eq!(&loc.address[12..16], &[192, 168, 1, 100]);
        assert_eq!(loc.to_socket_addr(), addr);
    }

    #[test]
    fn test_locator_roundtrip_v6() {
        let addr: SocketAddr = "[2001:db8::1]:7400".parse().expect("addr");
        let loc = Locator::from_socket_addr(LocatorKind::Tcpv6, &addr);
        assert_eq!(loc.to_socket_addr(), addr);
    }

    #[test]
    fn test_locator_display() {
        let addr: SocketAddr = "10.0.0.1:7400".parse().expect("addr");
        let loc = Locator::from_socket_addr(LocatorKind::Tcpv4, &addr);
        assert_eq!(loc.to_string(), "tcp/10.0.0.1:7400");
    }

    #[test]
    fn test_make_transport_follows_selector() {
        use crate::config::{Config, TransportSelector};

        let udp = make_transport(&Config::default()).expect("udp");
        assert!(udp.is_connless() && !udp.is_stream());

        let mut cfg = Config::default();
        cfg.transport_selector = TransportSelector::Tcp;
        let tcp = make_transport(&cfg).expect("tcp");
        assert!(tcp.is_stream());
        assert_eq!(tcp.kind(), LocatorKind::Tcpv4);

        cfg.ssl_enable = true;
        assert!(matches!(
            make_transport(&cfg),
            Err(crate::core::Error::Unsupported)
        ));
    }

    #[test]
    fn test_addrset_dedup_and_replace() {
        let set = AddrSet::new();
        let addr: SocketAddr = "10.0.0.1:1".parse().expect("addr");
        let loc = Locator::from_socket_addr(LocatorKind::Udpv4, &addr);
        assert!(set.add(loc));
        assert!(!set.add(loc));
        assert_eq!(set.to_vec().len(), 1);

        set.replace([]);
        assert!(set.is_empty());
    }
}
