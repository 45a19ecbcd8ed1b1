// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connectionless UDP transport.
//!
//! A channel is one bound socket; `write` addresses any peer locator,
//! `read` reports the source of each datagram. Sockets are built through
//! `socket2` so reuse and buffer options are set before bind.

use std::io::IoSlice;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::core::time::Dur;
use crate::core::{Error, Result};

use super::{Connection, Listener, Locator, LocatorKind, ReadOutcome, Transport};

/// Connectionless UDPv4 transport factory.
pub struct UdpTransport {
    read_timeout: Dur,
}

impl UdpTransport {
    /// Create the factory with the configured read timeout.
    #[must_use]
    pub fn new(read_timeout: Dur) -> Self {
        Self { read_timeout }
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> LocatorKind {
        LocatorKind::Udpv4
    }

    fn is_stream(&self) -> bool {
        false
    }

    fn is_connless(&self) -> bool {
        true
    }

    fn create_conn(&self, port: u16) -> Result<Arc<dyn Connection>> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&bind_addr.into())?;
        let socket: UdpSocket = socket.into();
        if !self.read_timeout.is_never() {
            socket.set_read_timeout(Some(self.read_timeout.to_std()))?;
        }
        let local = socket.local_addr()?;
        log::debug!("[udp] channel bound on {local}");
        Ok(Arc::new(UdpChannel {
            local: Locator::from_socket_addr(LocatorKind::Udpv4, &local),
            socket,
        }))
    }

    fn listen(&self, _port: u16) -> Result<Box<dyn Listener>> {
        Err(Error::IllegalOperation)
    }

    fn connect(&self, _peer: &Locator) -> Result<Arc<dyn Connection>> {
        Err(Error::IllegalOperation)
    }
}

/// One bound UDP socket.
pub struct UdpChannel {
    local: Locator,
    socket: UdpSocket,
}

impl UdpChannel {
    /// Clone the underlying socket handle for wait-set registration.
    pub fn try_clone_socket(&self) -> Result<UdpSocket> {
        Ok(self.socket.try_clone()?)
    }
}

impl Connection for UdpChannel {
    fn read(&self, buf: &mut [u8], allow_spurious: bool) -> Result<ReadOutcome> {
        match self.socket.recv_from(buf) {
            Ok((len, src)) => Ok(ReadOutcome::Data {
                len,
                src: Some(Locator::from_socket_addr(LocatorKind::Udpv4, &src)),
            }),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                if allow_spurious {
                    Ok(ReadOutcome::Spurious)
                } else {
                    Err(Error::Timeout)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, dst: &Locator, bufs: &[IoSlice<'_>]) -> Result<usize> {
        // Datagram sockets have no vectored send_to in std; one message is
        // one datagram, so coalesce the iovec first.
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut msg = Vec::with_capacity(total);
        for b in bufs {
            msg.extend_from_slice(b);
        }
        let sent = self.socket.send_to(&msg, dst.to_socket_addr())?;
        Ok(sent)
    }

    fn peer_locator(&self) -> Option<Locator> {
        None
    }

    fn local_locator(&self) -> Locator {
        self.local
    }

    fn close(&self) {
        // Dropping the channel closes the socket; nothing to do eagerly for
        // a connectionless flow.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> UdpTransport {
        UdpTransport::new(Dur::from_millis(200))
    }

    #[test]
    fn test_factory_capabilities() {
        let t = transport();
        assert_eq!(t.kind(), LocatorKind::Udpv4);
        assert!(t.is_connless());
        assert!(!t.is_stream());
        assert!(matches!(t.listen(0), Err(Error::IllegalOperation)));
    }

    #[test]
    fn test_roundtrip_datagram() {
        let t = transport();
        let a = t.create_conn(0).expect("bind a");
        let b = t.create_conn(0).expect("bind b");

        let mut dst = b.local_locator();
        // The channel is bound to 0.0.0.0; send to loopback instead.
        dst.address = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 127, 0, 0, 1];

        let payload = [b"hello " as &[u8], b"world!"];
        let iov = [IoSlice::new(payload[0]), IoSlice::new(payload[1])];
        let sent = a.write(&dst, &iov).expect("send");
        assert_eq!(sent, 12);

        let mut buf = [0u8; 64];
        match b.read(&mut buf, false).expect("recv") {
            ReadOutcome::Data { len, src } => {
                assert_eq!(&buf[..len], b"hello world!");
                assert!(src.is_some());
            }
            other => unreachable!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_spurious_read() {
        let t = transport();
        let conn = t.create_conn(0).expect("bind");
        let mut buf = [0u8; 16];
        assert_eq!(
            conn.read(&mut buf, true).expect("spurious allowed"),
            ReadOutcome::Spurious
        );
        assert!(matches!(conn.read(&mut buf, false), Err(Error::Timeout)));
    }
}
