// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream (TCP) transport with the peer-keyed connection cache.
//!
//! One ordered map from `(address family, peer port, peer address)` to
//! connection handles serves both directions:
//!
//! - An outbound write to an unknown peer creates a client-side entry with no
//!   socket; the first write connects it.
//! - An inbound accept creates a server-side entry, replacing any cached
//!   entry for that peer (last-accept wins).
//! - A cached entry found closed during write is deleted and recreated.
//! - Read/write errors on a client-side entry remove it from the cache and
//!   invoke the purge hook so proxies discovered only over that connection
//!   can be dropped. Server-side entries are marked closed but stay cached,
//!   as the receive wait-set still references them.
//!
//! Sockets run non-blocking with poll timeouts from the configuration; a
//! timeout on a partially-sent message is fatal to the connection.
//!
//! RTPS messages are self-delimiting by their header length field, so a
//! connection carries a plain byte stream and the receive glue frames it;
//! one connection carries both directions of traffic.

use std::collections::BTreeMap;
use std::io::{IoSlice, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::time::Dur;
use crate::core::{Error, Result};

use super::{Connection, Listener, Locator, LocatorKind, ReadOutcome, Transport};

/// Hook invoked when a connection to a peer dies: `(peer, server_side)`.
pub type PurgeFn = Box<dyn Fn(&Locator, bool) + Send + Sync>;

/// Cache key: ordered by family, then port, then address bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct CacheKey {
    family: u8,
    port: u32,
    addr: [u8; 16],
}

impl CacheKey {
    fn from_locator(loc: &Locator) -> Self {
        let family = match loc.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => 4,
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => 6,
        };
        Self {
            family,
            port: loc.port,
            addr: loc.address,
        }
    }
}

struct Shared {
    kind: LocatorKind,
    read_timeout: Dur,
    write_timeout: Dur,
    cache: Mutex<BTreeMap<CacheKey, Arc<TcpLink>>>,
    purge_hook: Mutex<Option<PurgeFn>>,
}

impl Shared {
    /// Find the cached link for `dst`, recreating closed entries and creating
    /// a socketless client entry on miss.
    fn find_or_create(&self, dst: &Locator) -> Arc<TcpLink> {
        let key = CacheKey::from_locator(dst);
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&key) {
            if !existing.is_closed() {
                return existing.clone();
            }
            log::debug!("[tcp] cache: dropping closed entry for {dst}");
            cache.remove(&key);
        }
        let link = Arc::new(TcpLink::client(*dst, self.read_timeout, self.write_timeout));
        cache.insert(key, link.clone());
        link
    }

    /// Insert a freshly accepted server-side link; last-accept wins.
    fn add_accepted(&self, link: Arc<TcpLink>) {
        let key = CacheKey::from_locator(&link.peer);
        let mut cache = self.cache.lock();
        if let Some(old) = cache.insert(key, link.clone()) {
            log::debug!("[tcp] cache: replacing entry for {} (last-accept wins)", link.peer);
            old.mark_closed();
        }
    }

    /// Handle a fatal error on `link` per its side of the connection.
    fn reap(&self, link: &Arc<TcpLink>) {
        if link.server_side {
            // Stays cached: the wait-set still references the socket.
            link.mark_closed();
        } else {
            let key = CacheKey::from_locator(&link.peer);
            let removed = {
                let mut cache = self.cache.lock();
                match cache.get(&key) {
                    Some(cur) if Arc::ptr_eq(cur, link) => cache.remove(&key).is_some(),
                    _ => false,
                }
            };
            link.mark_closed();
            if removed {
                if let Some(purge) = self.purge_hook.lock().as_ref() {
                    purge(&link.peer, false);
                }
            }
        }
    }
}

/// Stream transport factory.
pub struct TcpTransport {
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Create the factory for the given stream kind and timeouts.
    #[must_use]
    pub fn new(kind: LocatorKind, read_timeout: Dur, write_timeout: Dur) -> Self {
        debug_assert!(kind.is_stream());
        Self {
            shared: Arc::new(Shared {
                kind,
                read_timeout,
                write_timeout,
                cache: Mutex::new(BTreeMap::new()),
                purge_hook: Mutex::new(None),
            }),
        }
    }

    /// Install the proxy-purge hook invoked when a connection dies.
    pub fn set_purge_hook(&self, hook: PurgeFn) {
        *self.shared.purge_hook.lock() = Some(hook);
    }

    /// Number of cached connections (diagnostics).
    #[must_use]
    pub fn cached_connections(&self) -> usize {
        self.shared.cache.lock().len()
    }

    /// Dump the connection cache into `out` (debug monitor plugin food).
    pub fn dump_cache(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        let cache = self.shared.cache.lock();
        writeln!(out, "tcp cache: {} entries", cache.len())?;
        for link in cache.values() {
            writeln!(
                out,
                "  peer {} {} {}",
                link.peer,
                if link.server_side { "server" } else { "client" },
                if link.is_closed() { "closed" } else { "open" }
            )?;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> LocatorKind {
        self.shared.kind
    }

    fn is_stream(&self) -> bool {
        true
    }

    fn is_connless(&self) -> bool {
        false
    }

    fn create_conn(&self, port: u16) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(TcpRouter {
            shared: self.shared.clone(),
            local: Locator {
                kind: self.shared.kind,
                port: u32::from(port),
                address: [0; 16],
            },
        }))
    }

    fn listen(&self, port: u16) -> Result<Box<dyn Listener>> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let local = listener.local_addr()?;
        log::info!("[tcp] listening on {local}");
        Ok(Box::new(TcpAcceptor {
            listener,
            local: Locator::from_socket_addr(self.shared.kind, &local),
            shared: self.shared.clone(),
        }))
    }

    fn connect(&self, peer: &Locator) -> Result<Arc<dyn Connection>> {
        let link = self.shared.find_or_create(peer);
        link.ensure_connected()?;
        Ok(link)
    }
}

/// The routing connection handed to the transmit path: writes resolve the
/// destination through the cache, reads are served by per-peer links.
struct TcpRouter {
    shared: Arc<Shared>,
    local: Locator,
}

impl Connection for TcpRouter {
    fn read(&self, _buf: &mut [u8], _allow_spurious: bool) -> Result<ReadOutcome> {
        Err(Error::IllegalOperation)
    }

    fn write(&self, dst: &Locator, bufs: &[IoSlice<'_>]) -> Result<usize> {
        let link = self.shared.find_or_create(dst);
        match link.write(dst, bufs) {
            Ok(n) => Ok(n),
            Err(e) => {
                if link.is_closed() || !matches!(e, Error::Timeout) {
                    self.shared.reap(&link);
                }
                Err(e)
            }
        }
    }

    fn peer_locator(&self) -> Option<Locator> {
        None
    }

    fn local_locator(&self) -> Locator {
        self.local
    }

    fn close(&self) {}
}

/// A passive endpoint; each accept lands the connection in the cache.
struct TcpAcceptor {
    listener: TcpListener,
    local: Locator,
    shared: Arc<Shared>,
}

impl Listener for TcpAcceptor {
    fn accept(&self) -> Result<Arc<dyn Connection>> {
        let (stream, peer_addr) = self.listener.accept()?;
        let peer = Locator::from_socket_addr(self.shared.kind, &peer_addr);
        let link = Arc::new(TcpLink::accepted(
            peer,
            stream,
            self.shared.read_timeout,
            self.shared.write_timeout,
        )?);
        self.shared.add_accepted(link.clone());
        log::debug!("[tcp] accepted connection from {peer}");
        Ok(link)
    }

    fn local_locator(&self) -> Locator {
        self.local
    }
}

/// One cached TCP connection.
pub struct TcpLink {
    peer: Locator,
    server_side: bool,
    closed: AtomicBool,
    /// Write handle; holding this lock across the whole write loop is what
    /// makes stream writes message-atomic.
    wstream: Mutex<Option<TcpStream>>,
    /// Read handle (a clone of the same socket), owned by the receive path.
    rstream: Mutex<Option<TcpStream>>,
    read_timeout: Dur,
    write_timeout: Dur,
}

impl TcpLink {
    fn client(peer: Locator, read_timeout: Dur, write_timeout: Dur) -> Self {
        Self {
            peer,
            server_side: false,
            closed: AtomicBool::new(false),
            wstream: Mutex::new(None),
            rstream: Mutex::new(None),
            read_timeout,
            write_timeout,
        }
    }

    fn accepted(
        peer: Locator,
        stream: TcpStream,
        read_timeout: Dur,
        write_timeout: Dur,
    ) -> Result<Self> {
        let link = Self {
            peer,
            server_side: true,
            closed: AtomicBool::new(false),
            wstream: Mutex::new(None),
            rstream: Mutex::new(None),
            read_timeout,
            write_timeout,
        };
        link.install_stream(stream)?;
        Ok(link)
    }

    fn install_stream(&self, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.write_timeout.to_std()))?;
        let rclone = stream.try_clone()?;
        rclone.set_read_timeout(Some(self.read_timeout.to_std()))?;
        *self.rstream.lock() = Some(rclone);
        *self.wstream.lock() = Some(stream);
        Ok(())
    }

    /// Connect now if the link has no socket yet.
    pub fn ensure_connected(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Generic("connection closed".into()));
        }
        if self.wstream.lock().is_some() {
            return Ok(());
        }
        let addr = self.peer.to_socket_addr();
        let stream = TcpStream::connect_timeout(&addr, self.write_timeout.to_std())
            .map_err(|e| {
                log::debug!("[tcp] connect to {} failed: {e}", self.peer);
                Error::Generic(format!("connect to {}: {e}", self.peer))
            })?;
        log::debug!("[tcp] connected to {}", self.peer);
        self.install_stream(stream)
    }

    /// Clone the read-side socket handle for wait-set registration.
    pub fn try_clone_read_socket(&self) -> Result<TcpStream> {
        match self.rstream.lock().as_ref() {
            Some(s) => Ok(s.try_clone()?),
            None => Err(Error::PreconditionNotMet),
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(s) = self.wstream.lock().as_ref() {
                let _ = s.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    /// True once a fatal error or explicit close hit this link.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Side flag: true for accepted connections.
    #[must_use]
    pub fn is_server_side(&self) -> bool {
        self.server_side
    }
}

impl Connection for TcpLink {
    fn read(&self, buf: &mut [u8], allow_spurious: bool) -> Result<ReadOutcome> {
        if self.is_closed() {
            return Ok(ReadOutcome::Eof);
        }
        let mut guard = self.rstream.lock();
        let Some(stream) = guard.as_mut() else {
            return Err(Error::PreconditionNotMet);
        };
        match stream.read(buf) {
            Ok(0) => {
                drop(guard);
                self.mark_closed();
                Ok(ReadOutcome::Eof)
            }
            Ok(len) => Ok(ReadOutcome::Data {
                len,
                src: Some(self.peer),
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
            Err(e) => {
                drop(guard);
                self.mark_closed();
                Err(e.into())
            }
        }
    }

    fn write(&self, _dst: &Locator, bufs: &[IoSlice<'_>]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Generic("connection closed".into()));
        }
        // The guard is held for the whole message: message atomicity.
        let mut guard = self.wstream.lock();
        if guard.is_none() {
            drop(guard);
            self.ensure_connected()?;
            guard = self.wstream.lock();
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::Generic("connection has no socket".into()));
        };

        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut msg = Vec::with_capacity(total);
        for b in bufs {
            msg.extend_from_slice(b);
        }

        let mut written = 0;
        while written < total {
            match stream.write(&msg[written..]) {
                Ok(0) => {
                    drop(guard);
                    self.mark_closed();
                    return Err(Error::Generic("peer closed during write".into()));
                }
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    if written > 0 {
                        // Partially-sent message: the stream framing is now
                        // broken for the peer, the connection cannot be kept.
                        drop(guard);
                        self.mark_closed();
                        return Err(Error::Generic(format!(
                            "write timeout after {written}/{total} bytes to {}",
                            self.peer
                        )));
                    }
                    return Err(Error::Timeout);
                }
                Err(e) => {
                    drop(guard);
                    self.mark_closed();
                    return Err(e.into());
                }
            }
        }
        Ok(written)
    }

    fn peer_locator(&self) -> Option<Locator> {
        Some(self.peer)
    }

    fn local_locator(&self) -> Locator {
        self.wstream
            .lock()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map_or(
                Locator {
                    kind: self.peer.kind,
                    port: 0,
                    address: [0; 16],
                },
                |a| Locator::from_socket_addr(self.peer.kind, &a),
            )
    }

    fn close(&self) {
        self.mark_closed();
    }
}
