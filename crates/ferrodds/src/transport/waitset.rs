// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive wait-set.
//!
//! One `mio` poll instance multiplexing any number of UDP channels and TCP
//! connections onto a receive thread. Sources are registered by cloning the
//! socket handle, so the owning connection keeps its blocking reads while the
//! wait-set observes readability.

use std::collections::HashMap;
use std::net::{TcpStream, UdpSocket};
use std::time::Duration as StdDuration;

use mio::{Events, Interest, Poll, Token};

use crate::core::time::Dur;
use crate::core::{Error, Result};

enum Source {
    Udp(mio::net::UdpSocket),
    Tcp(mio::net::TcpStream),
}

/// A poll-based wait-set for receive threads.
pub struct RecvWaitset {
    poll: Poll,
    events: Events,
    sources: HashMap<Token, Source>,
    next_token: usize,
}

impl RecvWaitset {
    /// Create an empty wait-set.
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            sources: HashMap::new(),
            next_token: 0,
        })
    }

    /// Register a UDP socket handle for readability.
    pub fn attach_udp(&mut self, socket: UdpSocket) -> Result<Token> {
        socket.set_nonblocking(true)?;
        let mut mio_socket = mio::net::UdpSocket::from_std(socket);
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut mio_socket, token, Interest::READABLE)?;
        self.sources.insert(token, Source::Udp(mio_socket));
        Ok(token)
    }

    /// Register a TCP stream handle for readability.
    pub fn attach_tcp(&mut self, stream: TcpStream) -> Result<Token> {
        stream.set_nonblocking(true)?;
        let mut mio_stream = mio::net::TcpStream::from_std(stream);
        let token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut mio_stream, token, Interest::READABLE)?;
        self.sources.insert(token, Source::Tcp(mio_stream));
        Ok(token)
    }

    /// Deregister a source.
    pub fn detach(&mut self, token: Token) -> Result<()> {
        match self.sources.remove(&token) {
            Some(Source::Udp(mut s)) => self.poll.registry().deregister(&mut s)?,
            Some(Source::Tcp(mut s)) => self.poll.registry().deregister(&mut s)?,
            None => return Err(Error::PreconditionNotMet),
        }
        Ok(())
    }

    /// Wait until at least one source is readable or the timeout elapses.
    /// Returns the readable tokens (empty on timeout).
    pub fn wait(&mut self, timeout: Dur) -> Result<Vec<Token>> {
        let timeout = if timeout.is_never() {
            None
        } else {
            Some(StdDuration::from_nanos(
                u64::try_from(timeout.0).unwrap_or(0),
            ))
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        Ok(self.events.iter().map(|ev| ev.token()).collect())
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True iff nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_wait_times_out() {
        let mut ws = RecvWaitset::new().expect("waitset");
        let ready = ws.wait(Dur::from_millis(10)).expect("wait");
        assert!(ready.is_empty());
        assert!(ws.is_empty());
    }

    #[test]
    fn test_udp_readability() {
        let mut ws = RecvWaitset::new().expect("waitset");
        let rx = UdpSocket::bind("127.0.0.1:0").expect("bind rx");
        let rx_addr = rx.local_addr().expect("addr");
        let token = ws
            .attach_udp(rx.try_clone().expect("clone"))
            .expect("attach");

        let tx = UdpSocket::bind("127.0.0.1:0").expect("bind tx");
        tx.send_to(b"ping", rx_addr).expect("send");

        let ready = ws.wait(Dur::from_millis(500)).expect("wait");
        assert!(ready.contains(&token));
    }

    #[test]
    fn test_detach_stops_events() {
        let mut ws = RecvWaitset::new().expect("waitset");
        let rx = UdpSocket::bind("127.0.0.1:0").expect("bind rx");
        let token = ws
            .attach_udp(rx.try_clone().expect("clone"))
            .expect("attach");
        ws.detach(token).expect("detach");
        assert!(ws.is_empty());
        assert!(matches!(ws.detach(token), Err(Error::PreconditionNotMet)));
    }
}
