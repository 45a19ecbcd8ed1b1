// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local endpoints and their discovered proxies.
//!
//! A local writer owns its WHC, a local reader its RHC. Proxy endpoints
//! carry the remote QoS and address set plus per-peer match state; for a
//! reliable proxy writer that state includes the in-order gate which holds
//! back samples until the reliability path has closed every gap below them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::guid::Guid;
use crate::core::serdata::{SerializedSample, WriteState};
use crate::core::time::{Mtime, Wtime};
use crate::qos::Qos;
use crate::rhc::ReaderHistoryCache;
use crate::transport::AddrSet;
use crate::whc::WriterHistoryCache;

/// Topic identity shared by endpoints with the same name/type pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: Arc<str>,
    pub type_name: Arc<str>,
    pub keyed: bool,
}

impl Topic {
    /// Build a topic identity.
    #[must_use]
    pub fn new(name: &str, type_name: &str, keyed: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            type_name: type_name.into(),
            keyed,
        })
    }
}

/// Match-table entry for a remote peer endpoint (keyed by its GUID).
#[derive(Debug, Clone, Copy)]
pub struct MatchedPeer {
    pub reliable: bool,
}

/// A local data writer.
pub struct LocalWriter {
    pub guid: Guid,
    pub topic: Arc<Topic>,
    pub qos: Qos,
    pub whc: WriterHistoryCache,
    matched: Mutex<BTreeMap<Guid, MatchedPeer>>,
    deleted: AtomicBool,
}

impl LocalWriter {
    /// Create the writer and its history cache.
    #[must_use]
    pub fn new(guid: Guid, topic: Arc<Topic>, qos: Qos, low_water: usize, high_water: usize) -> Self {
        let whc = WriterHistoryCache::new(&qos, low_water, high_water);
        Self {
            guid,
            topic,
            qos,
            whc,
            matched: Mutex::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Record a match with a proxy reader; registers it in the WHC.
    /// Returns false when the match already existed.
    pub fn add_match(&self, peer: Guid, reliable: bool) -> bool {
        let inserted = self
            .matched
            .lock()
            .insert(peer, MatchedPeer { reliable })
            .is_none();
        if inserted {
            self.whc.register_reader(peer, reliable);
        }
        inserted
    }

    /// Drop a match; deregisters the reader from the WHC.
    pub fn remove_match(&self, peer: &Guid) -> bool {
        let removed = self.matched.lock().remove(peer).is_some();
        if removed {
            self.whc.remove_reader(peer);
        }
        removed
    }

    /// GUIDs of currently matched proxy readers.
    #[must_use]
    pub fn matched_subscriptions(&self) -> Vec<Guid> {
        self.matched.lock().keys().copied().collect()
    }

    /// Number of matched readers.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matched.lock().len()
    }

    /// True iff `peer` is currently matched.
    #[must_use]
    pub fn is_matched(&self, peer: &Guid) -> bool {
        self.matched.lock().contains_key(peer)
    }

    /// First phase of deletion.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

/// A local data reader.
pub struct LocalReader {
    pub guid: Guid,
    pub topic: Arc<Topic>,
    pub qos: Qos,
    pub rhc: ReaderHistoryCache,
    matched: Mutex<BTreeMap<Guid, MatchedPeer>>,
    deleted: AtomicBool,
}

impl LocalReader {
    /// Create the reader and its history cache.
    #[must_use]
    pub fn new(
        guid: Guid,
        topic: Arc<Topic>,
        qos: Qos,
        tkmap: Arc<crate::tkmap::TkMap>,
    ) -> Self {
        let rhc = ReaderHistoryCache::new(&qos, tkmap);
        Self {
            guid,
            topic,
            qos,
            rhc,
            matched: Mutex::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Record a match with a proxy writer.
    pub fn add_match(&self, peer: Guid, reliable: bool) -> bool {
        self.matched
            .lock()
            .insert(peer, MatchedPeer { reliable })
            .is_none()
    }

    /// Drop a match; the RHC transitions instances the writer kept alive.
    pub fn remove_match(&self, peer: &Guid) -> bool {
        let removed = self.matched.lock().remove(peer).is_some();
        if removed {
            self.rhc.writer_gone(peer);
        }
        removed
    }

    /// GUIDs of currently matched proxy writers.
    #[must_use]
    pub fn matched_publications(&self) -> Vec<Guid> {
        self.matched.lock().keys().copied().collect()
    }

    /// Number of matched writers.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matched.lock().len()
    }

    /// First phase of deletion.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

/// A sample parked in (or released by) the in-order gate.
#[derive(Debug, Clone)]
pub struct GatedSample {
    pub serdata: SerializedSample,
    pub state: WriteState,
    pub timestamp: Wtime,
}

/// Per-(proxy writer, local reader) delivery gate.
///
/// Reliable mode: samples are surfaced strictly in sequence order; a gap
/// parks everything above it until retransmission (or a GAP announcement)
/// closes it. Best-effort mode: old and duplicate sequences are dropped,
/// gaps pass through.
#[derive(Debug)]
pub struct InOrderGate {
    reliable: bool,
    next_seq: u64,
    pending: BTreeMap<u64, GatedSample>,
}

impl InOrderGate {
    /// Create a gate; `reliable` selects parking vs pass-through.
    #[must_use]
    pub fn new(reliable: bool) -> Self {
        Self {
            reliable,
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Feed one received sample; returns the samples that became
    /// deliverable, in sequence order.
    pub fn accept(&mut self, seq: u64, sample: GatedSample) -> Vec<(u64, GatedSample)> {
        // First sample ever seen sets the baseline (late joiners do not
        // wait for history that predates them).
        if self.next_seq == 0 {
            self.next_seq = seq + 1;
            return vec![(seq, sample)];
        }

        if seq < self.next_seq {
            return Vec::new(); // duplicate or already-surfaced
        }

        if !self.reliable {
            self.next_seq = seq + 1;
            return vec![(seq, sample)];
        }

        self.pending.insert(seq, sample);
        self.drain_ready()
    }

    /// A GAP announcement: sequences in `[start, end)` will never arrive.
    pub fn handle_gap(&mut self, start: u64, end: u64) -> Vec<(u64, GatedSample)> {
        if self.next_seq >= start && self.next_seq < end {
            self.next_seq = end;
        }
        self.pending.retain(|&s, _| s >= end || s < start);
        self.drain_ready()
    }

    /// Highest sequence below which everything was surfaced (ACK base is
    /// `acked_through + 1`).
    #[must_use]
    pub fn acked_through(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }

    /// Missing sequences as an ACKNACK-style `(base, bitmap)` pair, `None`
    /// when nothing is outstanding. Bit `i` requests `base + i`.
    #[must_use]
    pub fn missing(&self) -> Option<(u64, u32)> {
        let max_pending = *self.pending.keys().next_back()?;
        let base = self.next_seq;
        let mut bitmap = 0u32;
        for seq in base..max_pending.min(base + 31) {
            if !self.pending.contains_key(&seq) {
                bitmap |= 1 << (seq - base);
            }
        }
        (bitmap != 0).then_some((base, bitmap))
    }

    /// Number of parked samples.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn drain_ready(&mut self) -> Vec<(u64, GatedSample)> {
        let mut ready = Vec::new();
        while let Some(sample) = self.pending.remove(&self.next_seq) {
            ready.push((self.next_seq, sample));
            self.next_seq += 1;
        }
        ready
    }
}

/// Per-local-reader match state of a proxy writer.
pub struct ProxyWriterMatch {
    pub in_sync: bool,
    pub last_nack: Mtime,
    pub gate: InOrderGate,
}

/// Remote writer discovered via SEDP.
pub struct ProxyWriter {
    pub guid: Guid,
    /// GUID of the proxy participant this endpoint belongs to.
    pub participant: Guid,
    pub topic_name: Arc<str>,
    pub type_name: Arc<str>,
    pub keyed: bool,
    pub qos: Qos,
    pub addrset: AddrSet,
    matches: Mutex<BTreeMap<Guid, ProxyWriterMatch>>,
    deleted: AtomicBool,
}

impl ProxyWriter {
    /// Create from a received SEDP publication record.
    #[must_use]
    pub fn new(
        guid: Guid,
        participant: Guid,
        topic_name: Arc<str>,
        type_name: Arc<str>,
        keyed: bool,
        qos: Qos,
    ) -> Self {
        Self {
            guid,
            participant,
            topic_name,
            type_name,
            keyed,
            qos,
            addrset: AddrSet::new(),
            matches: Mutex::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Record a match with a local reader, creating its delivery gate.
    pub fn add_match(&self, reader: Guid, reliable: bool) -> bool {
        let mut matches = self.matches.lock();
        if matches.contains_key(&reader) {
            return false;
        }
        matches.insert(
            reader,
            ProxyWriterMatch {
                in_sync: true,
                last_nack: Mtime(0),
                gate: InOrderGate::new(reliable),
            },
        );
        true
    }

    /// Drop a match.
    pub fn remove_match(&self, reader: &Guid) -> bool {
        self.matches.lock().remove(reader).is_some()
    }

    /// Run `f` on the match state for `reader`, if matched.
    pub fn with_match<R>(&self, reader: &Guid, f: impl FnOnce(&mut ProxyWriterMatch) -> R) -> Option<R> {
        self.matches.lock().get_mut(reader).map(f)
    }

    /// GUIDs of matched local readers.
    #[must_use]
    pub fn matched_readers(&self) -> Vec<Guid> {
        self.matches.lock().keys().copied().collect()
    }

    /// First phase of deletion.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

/// Per-local-writer match state of a proxy reader.
#[derive(Debug, Clone, Copy)]
pub struct ProxyReaderMatch {
    pub in_sync: bool,
    pub last_nack: Mtime,
    pub last_seq: u64,
}

/// Remote reader discovered via SEDP.
pub struct ProxyReader {
    pub guid: Guid,
    /// GUID of the proxy participant this endpoint belongs to.
    pub participant: Guid,
    pub topic_name: Arc<str>,
    pub type_name: Arc<str>,
    pub keyed: bool,
    pub qos: Qos,
    pub addrset: AddrSet,
    matches: Mutex<BTreeMap<Guid, ProxyReaderMatch>>,
    deleted: AtomicBool,
}

impl ProxyReader {
    /// Create from a received SEDP subscription record.
    #[must_use]
    pub fn new(
        guid: Guid,
        participant: Guid,
        topic_name: Arc<str>,
        type_name: Arc<str>,
        keyed: bool,
        qos: Qos,
    ) -> Self {
        Self {
            guid,
            participant,
            topic_name,
            type_name,
            keyed,
            qos,
            addrset: AddrSet::new(),
            matches: Mutex::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Record a match with a local writer.
    pub fn add_match(&self, writer: Guid) -> bool {
        self.matches
            .lock()
            .insert(
                writer,
                ProxyReaderMatch {
                    in_sync: true,
                    last_nack: Mtime(0),
                    last_seq: 0,
                },
            )
            .is_none()
    }

    /// Drop a match.
    pub fn remove_match(&self, writer: &Guid) -> bool {
        self.matches.lock().remove(writer).is_some()
    }

    /// Run `f` on the match state for `writer`, if matched.
    pub fn with_match<R>(&self, writer: &Guid, f: impl FnOnce(&mut ProxyReaderMatch) -> R) -> Option<R> {
        self.matches.lock().get_mut(writer).map(f)
    }

    /// GUIDs of matched local writers.
    #[must_use]
    pub fn matched_writers(&self) -> Vec<Guid> {
        self.matches.lock().keys().copied().collect()
    }

    /// First phase of deletion.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}
