// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history cache and the writer side of the reliability protocol.
//!
//! Samples are stored under monotonically increasing sequence numbers
//! starting at 1. Keep-last pruning is depth-driven per instance; keep-all
//! pruning is ACK-driven: a sample leaves the cache once every reliable
//! in-sync reader acknowledged it. Writes block between the high and low
//! watermarks (bytes of unacknowledged data) and fail with `Timeout` once
//! `max_blocking_time` elapses while throttled.
//!
//! The heartbeat schedule backs off exponentially from
//! [`crate::config::HB_INTERVAL_MIN`] while heartbeats go unanswered,
//! capped at [`crate::config::HB_INTERVAL_MAX`]; any ACK or fresh write
//! resets it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound::{Excluded, Included};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::{HB_INTERVAL_MAX, HB_INTERVAL_MIN};
use crate::core::guid::Guid;
use crate::core::serdata::{SerializedSample, WriteState};
use crate::core::time::{Dur, Mtime, Wtime};
use crate::core::{Error, Result};
use crate::qos::{History, Qos, Reliability};
use crate::tkmap::InstanceHandle;

/// One sample resident in a writer history cache.
#[derive(Debug, Clone)]
pub struct WhcSample {
    pub seq: u64,
    pub serdata: SerializedSample,
    pub state: WriteState,
    pub timestamp: Wtime,
    pub handle: InstanceHandle,
}

/// Reliability counters, observable through the debug monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WhcCounters {
    pub num_acks_received: u64,
    pub num_nacks_received: u64,
    pub rexmit_count: u64,
    pub rexmit_lost_count: u64,
    pub throttle_count: u64,
}

/// Snapshot of the cache state for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct WhcState {
    pub min_seq: u64,
    pub max_seq: u64,
    pub unacked_bytes: usize,
    pub counters: WhcCounters,
    pub throttling: bool,
}

/// Result of processing one NACK.
#[derive(Debug, Default)]
pub struct NackOutcome {
    /// Samples still resident: retransmit these.
    pub retransmit: Vec<WhcSample>,
    /// Requested sequences no longer resident: answer with a GAP.
    pub lost: Vec<u64>,
}

#[derive(Debug)]
struct ReaderState {
    reliable: bool,
    in_sync: bool,
    seq_acked: u64,
    has_replied_to_hb: bool,
    last_nack: Mtime,
    rexmit_requests: u64,
}

#[derive(Debug)]
struct HeartbeatState {
    hbs_since_last_write: u32,
    t_of_last_hb: Mtime,
    t_of_last_ackhb: Mtime,
    t_of_last_write: Mtime,
    tsched: Mtime,
}

struct Inner {
    samples: BTreeMap<u64, WhcSample>,
    by_instance: HashMap<InstanceHandle, VecDeque<u64>>,
    /// Key bytes of instances this writer has registered and not
    /// unregistered; consulted when the writer is deleted with
    /// autodispose set.
    registered: BTreeMap<InstanceHandle, std::sync::Arc<[u8]>>,
    next_seq: u64,
    /// All samples with `seq <= drop_seq` are acknowledged by every reliable
    /// in-sync reader.
    drop_seq: u64,
    unacked_bytes: usize,
    readers: BTreeMap<Guid, ReaderState>,
    hb: HeartbeatState,
    counters: WhcCounters,
    throttling: u32,
}

/// Per-writer sequence-numbered sample store with ACK/NACK bookkeeping.
pub struct WriterHistoryCache {
    reliable: bool,
    history: History,
    low_water: usize,
    high_water: usize,
    max_blocking_time: Dur,
    inner: Mutex<Inner>,
    space: Condvar,
}

impl WriterHistoryCache {
    /// Build from the writer's QoS snapshot and the configured watermarks.
    #[must_use]
    pub fn new(qos: &Qos, low_water: usize, high_water: usize) -> Self {
        Self {
            reliable: qos.reliability == Reliability::Reliable,
            history: qos.history,
            low_water,
            high_water,
            max_blocking_time: qos.max_blocking_time,
            inner: Mutex::new(Inner {
                samples: BTreeMap::new(),
                by_instance: HashMap::new(),
                registered: BTreeMap::new(),
                next_seq: 1,
                drop_seq: 0,
                unacked_bytes: 0,
                readers: BTreeMap::new(),
                hb: HeartbeatState {
                    hbs_since_last_write: 0,
                    t_of_last_hb: Mtime(0),
                    t_of_last_ackhb: Mtime(0),
                    t_of_last_write: Mtime(0),
                    tsched: Mtime(0),
                },
                counters: WhcCounters::default(),
                throttling: 0,
            }),
            space: Condvar::new(),
        }
    }

    /// Append a sample, assigning the next sequence number.
    ///
    /// Blocks while the cache sits above the high watermark until it drains
    /// to the low watermark; fails with [`Error::Timeout`] when
    /// `max_blocking_time` elapses first.
    pub fn write(
        &self,
        serdata: SerializedSample,
        state: WriteState,
        timestamp: Wtime,
        handle: InstanceHandle,
        now: Mtime,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();

        if self.reliable
            && inner.readers.values().any(|r| r.reliable && r.in_sync)
            && inner.unacked_bytes >= self.high_water
        {
            inner.counters.throttle_count += 1;
            inner.throttling += 1;
            let deadline = if self.max_blocking_time.is_never() {
                None
            } else {
                Some(Instant::now() + self.max_blocking_time.to_std())
            };
            log::debug!(
                "[whc] throttling write: {} unacked bytes >= high water {}",
                inner.unacked_bytes,
                self.high_water
            );
            while inner.unacked_bytes > self.low_water {
                match deadline {
                    Some(dl) => {
                        if self.space.wait_until(&mut inner, dl).timed_out() {
                            inner.throttling -= 1;
                            return Err(Error::Timeout);
                        }
                    }
                    None => self.space.wait(&mut inner),
                }
            }
            inner.throttling -= 1;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let size = serdata.size();
        if !handle.is_nil() {
            match state {
                WriteState::Unregister => {
                    inner.registered.remove(&handle);
                }
                _ => {
                    inner.registered.insert(handle, serdata.key().clone());
                }
            }
        }
        inner.samples.insert(
            seq,
            WhcSample {
                seq,
                serdata,
                state,
                timestamp,
                handle,
            },
        );
        inner.unacked_bytes += size;
        inner.by_instance.entry(handle).or_default().push_back(seq);

        if let History::KeepLast(depth) = self.history {
            self.prune_instance_depth(&mut inner, handle, depth);
        }

        inner.hb.t_of_last_write = now;
        inner.hb.hbs_since_last_write = 0;
        inner.hb.tsched = now.add_dur(HB_INTERVAL_MIN);

        self.reconcile(&mut inner);
        Ok(seq)
    }

    /// Register a matched reader. Late joiners start fully acknowledged.
    pub fn register_reader(&self, guid: Guid, reliable: bool) {
        let mut inner = self.inner.lock();
        let acked = inner.next_seq - 1;
        inner.readers.insert(
            guid,
            ReaderState {
                reliable,
                in_sync: true,
                seq_acked: acked,
                has_replied_to_hb: false,
                last_nack: Mtime(0),
                rexmit_requests: 0,
            },
        );
        self.reconcile(&mut inner);
    }

    /// Remove a matched reader; its outstanding acks no longer hold samples.
    pub fn remove_reader(&self, guid: &Guid) {
        let mut inner = self.inner.lock();
        inner.readers.remove(guid);
        self.reconcile(&mut inner);
    }

    /// Flip a reader out-of-sync: it stops holding back pruning but stays
    /// matched (used by the reader-deletion path instead of waiting for a
    /// delivery drain).
    pub fn set_reader_out_of_sync(&self, guid: &Guid) {
        let mut inner = self.inner.lock();
        if let Some(r) = inner.readers.get_mut(guid) {
            r.in_sync = false;
        }
        self.reconcile(&mut inner);
    }

    /// Process an ACK covering all sequences up to and including `seq`.
    /// Regressions are ignored. Returns the number of samples pruned.
    pub fn ack(&self, reader: &Guid, seq: u64, now: Mtime) -> usize {
        let mut inner = self.inner.lock();
        inner.counters.num_acks_received += 1;
        let Some(r) = inner.readers.get_mut(reader) else {
            return 0;
        };
        r.has_replied_to_hb = true;
        if seq > r.seq_acked {
            r.seq_acked = seq;
        }
        inner.hb.t_of_last_ackhb = now;
        inner.hb.hbs_since_last_write = 0;
        inner.hb.tsched = now.add_dur(HB_INTERVAL_MIN);
        self.reconcile(&mut inner)
    }

    /// Process a NACK: `base` plus a bitmap of additionally requested
    /// sequences (`bit i` selects `base + i`; bit 0 is `base` itself).
    pub fn nack(&self, reader: &Guid, base: u64, bitmap: u32, now: Mtime) -> NackOutcome {
        let mut inner = self.inner.lock();
        inner.counters.num_nacks_received += 1;

        let mut requested = Vec::new();
        for bit in 0u32..32 {
            if bitmap & (1 << bit) != 0 {
                requested.push(base + u64::from(bit));
            }
        }

        if let Some(r) = inner.readers.get_mut(reader) {
            r.last_nack = now;
            r.rexmit_requests += requested.len() as u64;
        }

        let mut out = NackOutcome::default();
        for seq in requested {
            match inner.samples.get(&seq) {
                Some(sample) => {
                    out.retransmit.push(sample.clone());
                    inner.counters.rexmit_count += 1;
                }
                None => {
                    out.lost.push(seq);
                    inner.counters.rexmit_lost_count += 1;
                }
            }
        }
        out
    }

    /// Heartbeat scheduler: returns `(first_seq, last_seq)` when a heartbeat
    /// is due at `now`, advancing the backoff schedule.
    pub fn heartbeat_due(&self, now: Mtime) -> Option<(u64, u64)> {
        if !self.reliable {
            return None;
        }
        let mut inner = self.inner.lock();
        if inner.unacked_bytes == 0
            || !inner.readers.values().any(|r| r.reliable && r.in_sync)
            || now < inner.hb.tsched
        {
            return None;
        }
        let first = self.min_seq(&inner);
        let last = inner.next_seq - 1;
        inner.hb.t_of_last_hb = now;
        inner.hb.hbs_since_last_write += 1;
        let interval = hb_backoff(inner.hb.hbs_since_last_write);
        inner.hb.tsched = now.add_dur(interval);
        Some((first, last))
    }

    /// Fetch a resident sample (retransmit path).
    #[must_use]
    pub fn get(&self, seq: u64) -> Option<WhcSample> {
        self.inner.lock().samples.get(&seq).cloned()
    }

    /// Sequences at and below this are acknowledged by every reliable
    /// in-sync reader.
    #[must_use]
    pub fn max_drop_seq(&self) -> u64 {
        self.inner.lock().drop_seq
    }

    /// Number of resident samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// True iff no sample is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().samples.is_empty()
    }

    /// Diagnostics snapshot.
    #[must_use]
    pub fn state(&self) -> WhcState {
        let inner = self.inner.lock();
        WhcState {
            min_seq: self.min_seq(&inner),
            max_seq: inner.next_seq - 1,
            unacked_bytes: inner.unacked_bytes,
            counters: inner.counters,
            throttling: inner.throttling > 0,
        }
    }

    /// Instances this writer has registered and not unregistered, with
    /// their key bytes (consumed by the autodispose path on delete).
    #[must_use]
    pub fn live_instances(&self) -> Vec<(InstanceHandle, std::sync::Arc<[u8]>)> {
        self.inner
            .lock()
            .registered
            .iter()
            .map(|(h, k)| (*h, k.clone()))
            .collect()
    }

    /// Resident samples above `from_seq`, in sequence order (late-joiner
    /// replay for transient-local durability).
    #[must_use]
    pub fn samples_since(&self, from_seq: u64) -> Vec<WhcSample> {
        self.inner
            .lock()
            .samples
            .range((Excluded(from_seq), Included(u64::MAX)))
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn min_seq(&self, inner: &Inner) -> u64 {
        inner
            .samples
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.next_seq)
    }

    /// Recompute the drop sequence from reader ack state; prune keep-all
    /// samples that became acknowledged everywhere, fix unacked byte
    /// accounting, and release throttled writers.
    fn reconcile(&self, inner: &mut Inner) -> usize {
        let new_drop = inner
            .readers
            .values()
            .filter(|r| r.reliable && r.in_sync)
            .map(|r| r.seq_acked)
            .min()
            .unwrap_or(inner.next_seq - 1);

        let mut pruned = 0;
        if new_drop > inner.drop_seq {
            let newly_acked: Vec<u64> = inner
                .samples
                .range((Excluded(inner.drop_seq), Included(new_drop)))
                .map(|(&seq, _)| seq)
                .collect();
            for seq in newly_acked {
                if matches!(self.history, History::KeepAll) {
                    if let Some(sample) = inner.samples.remove(&seq) {
                        inner.unacked_bytes =
                            inner.unacked_bytes.saturating_sub(sample.serdata.size());
                        if let Some(q) = inner.by_instance.get_mut(&sample.handle) {
                            q.retain(|&s| s != seq);
                        }
                        pruned += 1;
                    }
                } else if let Some(sample) = inner.samples.get(&seq) {
                    inner.unacked_bytes =
                        inner.unacked_bytes.saturating_sub(sample.serdata.size());
                }
            }
            inner.drop_seq = new_drop;
        }

        if inner.unacked_bytes <= self.low_water && inner.throttling > 0 {
            self.space.notify_all();
        }
        pruned
    }

    /// Keep-last: evict the oldest sample of `handle` beyond `depth`.
    fn prune_instance_depth(&self, inner: &mut Inner, handle: InstanceHandle, depth: u32) {
        loop {
            let evict = match inner.by_instance.get_mut(&handle) {
                Some(q) if q.len() > depth as usize => q.pop_front(),
                _ => break,
            };
            let Some(seq) = evict else { break };
            if let Some(sample) = inner.samples.remove(&seq) {
                if seq > inner.drop_seq {
                    inner.unacked_bytes =
                        inner.unacked_bytes.saturating_sub(sample.serdata.size());
                }
            }
        }
    }
}

/// Bounded exponential heartbeat backoff.
fn hb_backoff(hbs_since_last_write: u32) -> Dur {
    let shift = hbs_since_last_write.min(6);
    let ns = HB_INTERVAL_MIN.0.saturating_mul(1 << shift);
    Dur(ns.min(HB_INTERVAL_MAX.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(n: usize) -> SerializedSample {
        SerializedSample::new(b"k".to_vec(), vec![0u8; n])
    }

    fn handle() -> InstanceHandle {
        InstanceHandle::NIL
    }

    fn reader(n: u8) -> Guid {
        Guid::from_bytes([n; 16])
    }

    fn reliable_whc() -> WriterHistoryCache {
        WriterHistoryCache::new(&Qos::reliable(), 64, 256)
    }

    fn write_one(whc: &WriterHistoryCache, n: usize) -> u64 {
        whc.write(sample(n), WriteState::Write, Wtime(0), handle(), Mtime(0))
            .expect("write should succeed")
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let whc = reliable_whc();
        assert_eq!(write_one(&whc, 4), 1);
        assert_eq!(write_one(&whc, 4), 2);
        let st = whc.state();
        assert_eq!(st.min_seq, 1);
        assert_eq!(st.max_seq, 2);
    }

    #[test]
    fn test_no_readers_means_immediately_acked() {
        let whc = reliable_whc();
        write_one(&whc, 100);
        // Keep-all with nothing to hold it back: pruned right away.
        assert!(whc.is_empty());
        assert_eq!(whc.state().unacked_bytes, 0);
    }

    #[test]
    fn test_ack_advances_drop_seq_and_prunes() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        for _ in 0..5 {
            write_one(&whc, 10);
        }
        assert_eq!(whc.len(), 5);
        assert_eq!(whc.max_drop_seq(), 0);

        whc.ack(&reader(1), 3, Mtime(1));
        assert_eq!(whc.max_drop_seq(), 3);
        assert_eq!(whc.len(), 2);
        assert_eq!(whc.state().min_seq, 4);

        // Regressing ack is ignored.
        whc.ack(&reader(1), 1, Mtime(2));
        assert_eq!(whc.max_drop_seq(), 3);
    }

    #[test]
    fn test_drop_seq_is_min_over_readers() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        whc.register_reader(reader(2), true);
        for _ in 0..4 {
            write_one(&whc, 8);
        }
        whc.ack(&reader(1), 4, Mtime(1));
        assert_eq!(whc.max_drop_seq(), 0);
        whc.ack(&reader(2), 2, Mtime(2));
        assert_eq!(whc.max_drop_seq(), 2);
        // Invariant: every in-sync reliable reader has seq_acked >= drop_seq.
        whc.ack(&reader(2), 4, Mtime(3));
        assert_eq!(whc.max_drop_seq(), 4);
        assert!(whc.is_empty());
    }

    #[test]
    fn test_keep_last_prunes_by_depth_not_acks() {
        let mut qos = Qos::reliable();
        qos.history = History::KeepLast(1);
        let whc = WriterHistoryCache::new(&qos, 64, 1 << 20);
        whc.register_reader(reader(1), true);
        for _ in 0..10 {
            write_one(&whc, 10);
        }
        // Only the newest sample of the single instance survives.
        assert_eq!(whc.len(), 1);
        assert!(whc.get(10).is_some());
        assert!(whc.get(9).is_none());
    }

    #[test]
    fn test_nack_splits_retransmit_and_lost() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        for _ in 0..10 {
            write_one(&whc, 10);
        }
        whc.ack(&reader(1), 4, Mtime(1)); // 1..=4 pruned

        // Request 3 (gone), 5 and 7 (resident): base 3, bits 0, 2, 4.
        let out = whc.nack(&reader(1), 3, 0b1_0101, Mtime(2));
        assert_eq!(
            out.retransmit.iter().map(|s| s.seq).collect::<Vec<_>>(),
            vec![5, 7]
        );
        assert_eq!(out.lost, vec![3]);

        let st = whc.state();
        assert_eq!(st.counters.rexmit_count, 2);
        assert_eq!(st.counters.rexmit_lost_count, 1);
        assert_eq!(st.counters.num_nacks_received, 1);
    }

    #[test]
    fn test_nack_scenario_single_drop() {
        // Reliable writer sends 1..=10, reader lost seq 5.
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        for _ in 0..10 {
            write_one(&whc, 10);
        }
        let out = whc.nack(&reader(1), 5, 0b1, Mtime(1));
        assert_eq!(out.retransmit.len(), 1);
        assert_eq!(out.retransmit[0].seq, 5);
        assert!(out.lost.is_empty());

        whc.ack(&reader(1), 10, Mtime(2));
        let st = whc.state();
        assert_eq!(st.counters.rexmit_count, 1);
        assert_eq!(st.counters.rexmit_lost_count, 0);
        assert!(whc.is_empty());
    }

    #[test]
    fn test_heartbeat_backoff_and_reset() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        write_one(&whc, 10);

        let t0 = Mtime(0).add_dur(HB_INTERVAL_MIN);
        let (first, last) = whc.heartbeat_due(t0).expect("first heartbeat due");
        assert_eq!((first, last), (1, 1));

        // Immediately after: not due, backoff doubled.
        assert!(whc.heartbeat_due(t0).is_none());
        let t1 = t0.add_dur(Dur(2 * HB_INTERVAL_MIN.0));
        assert!(whc.heartbeat_due(t1).is_some());

        // An ACK resets the schedule to the base interval.
        whc.ack(&reader(1), 0, Mtime(t1.0));
        let t2 = t1.add_dur(HB_INTERVAL_MIN);
        assert!(whc.heartbeat_due(t2).is_some());
    }

    #[test]
    fn test_heartbeat_silent_when_all_acked() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        write_one(&whc, 10);
        whc.ack(&reader(1), 1, Mtime(1));
        assert!(whc.heartbeat_due(Mtime::NEVER).is_none());
    }

    #[test]
    fn test_hb_backoff_is_bounded() {
        assert_eq!(hb_backoff(0), HB_INTERVAL_MIN);
        assert_eq!(hb_backoff(1), Dur(2 * HB_INTERVAL_MIN.0));
        assert_eq!(hb_backoff(100), HB_INTERVAL_MAX);
    }

    #[test]
    fn test_throttle_blocks_until_ack() {
        let mut qos = Qos::reliable();
        qos.max_blocking_time = Dur::from_secs(5);
        let whc = Arc::new(WriterHistoryCache::new(&qos, 10, 30));
        whc.register_reader(reader(1), true);

        // Fill past the high watermark.
        while whc.state().unacked_bytes < 30 {
            write_one(&whc, 20);
        }
        let max_seq = whc.state().max_seq;

        let whc2 = whc.clone();
        let acker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            whc2.ack(&reader(1), max_seq, Mtime(1));
        });

        // This write throttles, then completes once the ack drains the cache.
        let seq = write_one(&whc, 20);
        assert_eq!(seq, max_seq + 1);
        assert!(whc.state().counters.throttle_count >= 1);
        acker.join().expect("acker thread");
    }

    #[test]
    fn test_throttle_times_out() {
        let mut qos = Qos::reliable();
        qos.max_blocking_time = Dur::from_millis(30);
        let whc = WriterHistoryCache::new(&qos, 10, 30);
        whc.register_reader(reader(1), true);
        while whc.state().unacked_bytes < 30 {
            write_one(&whc, 20);
        }
        let err = whc.write(sample(20), WriteState::Write, Wtime(0), handle(), Mtime(0));
        assert_eq!(err, Err(Error::Timeout));
    }

    #[test]
    fn test_out_of_sync_reader_stops_holding_samples() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        whc.register_reader(reader(2), true);
        for _ in 0..3 {
            write_one(&whc, 10);
        }
        whc.ack(&reader(1), 3, Mtime(1));
        assert_eq!(whc.len(), 3); // reader 2 holds everything

        whc.set_reader_out_of_sync(&reader(2));
        assert!(whc.is_empty());
    }

    #[test]
    fn test_late_joining_reader_starts_acked() {
        let whc = reliable_whc();
        whc.register_reader(reader(1), true);
        for _ in 0..5 {
            write_one(&whc, 10);
        }
        whc.register_reader(reader(2), true);
        // The late joiner must not drag drop_seq back to zero.
        whc.ack(&reader(1), 5, Mtime(1));
        assert_eq!(whc.max_drop_seq(), 5);
    }
}
