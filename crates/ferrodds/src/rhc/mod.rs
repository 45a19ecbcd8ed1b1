// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader history cache (RHC).
//!
//! Per-reader, instance-keyed sample store with DDS read/take semantics:
//! samples carry a read/not-read state, instances a view state (new /
//! not-new) and an instance state (alive / disposed / no-writers) with
//! generation counters across rebirths. Reads filter on the
//! `(sample, view, instance)` mask triple, an optional instance handle, and
//! an optional query predicate; within an instance samples come back in
//! arrival order, across instances service is round-robin so no instance
//! starves.
//!
//! Each stored instance holds one reference on the global key map; the
//! reference drops when a take drains a not-alive instance.

/// Read/query conditions and state masks.
pub mod condition;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::guid::Guid;
use crate::core::serdata::{SerializedSample, WriteState};
use crate::core::time::Wtime;
use crate::core::{Error, Result};
use crate::qos::{History, Qos};
use crate::tkmap::{InstanceHandle, TkEntry, TkMap};

pub use condition::{
    InstanceStateMask, QueryCondition, ReadCondition, SampleStateMask, StateMasks, ViewStateMask,
};

/// Sample state as reported in [`SampleInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    NotRead,
    Read,
}

impl SampleState {
    fn mask(self) -> SampleStateMask {
        match self {
            SampleState::NotRead => SampleStateMask::NOT_READ,
            SampleState::Read => SampleStateMask::READ,
        }
    }
}

/// Instance view state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    New,
    NotNew,
}

impl ViewState {
    fn mask(self) -> ViewStateMask {
        match self {
            ViewState::New => ViewStateMask::NEW,
            ViewState::NotNew => ViewStateMask::NOT_NEW,
        }
    }
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

impl InstanceState {
    fn mask(self) -> InstanceStateMask {
        match self {
            InstanceState::Alive => InstanceStateMask::ALIVE,
            InstanceState::NotAliveDisposed => InstanceStateMask::NOT_ALIVE_DISPOSED,
            InstanceState::NotAliveNoWriters => InstanceStateMask::NOT_ALIVE_NO_WRITERS,
        }
    }
}

/// Per-sample metadata returned alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInfo {
    pub sample_state: SampleState,
    pub view_state: ViewState,
    pub instance_state: InstanceState,
    pub disposed_generation_count: u32,
    pub no_writers_generation_count: u32,
    pub source_timestamp: Wtime,
    pub sequence: u64,
    pub writer: Guid,
    pub instance_handle: InstanceHandle,
    /// False for the synthetic sample carrying a dispose/no-writers
    /// transition of an otherwise empty instance.
    pub valid_data: bool,
}

#[derive(Debug)]
struct RhcSample {
    serdata: SerializedSample,
    seq: u64,
    writer: Guid,
    timestamp: Wtime,
    read: bool,
    valid: bool,
    disposed_generation: u32,
    no_writers_generation: u32,
    /// Bit per attached query condition slot that matches this sample.
    query_matches: u32,
}

struct Instance {
    entry: Arc<TkEntry>,
    samples: VecDeque<RhcSample>,
    view: ViewState,
    istate: InstanceState,
    disposed_generation: u32,
    no_writers_generation: u32,
    live_writers: BTreeSet<Guid>,
}

impl Instance {
    fn valid_count(&self) -> usize {
        self.samples.iter().filter(|s| s.valid).count()
    }
}

struct Inner {
    instances: BTreeMap<u64, Instance>,
    /// Raw handle of the instance served last; reads resume after it.
    rr_cursor: u64,
    conditions: Vec<Arc<ReadCondition>>,
    queries: Vec<Option<Arc<QueryCondition>>>,
}

/// Per-reader keyed instance store.
pub struct ReaderHistoryCache {
    history: History,
    tkmap: Arc<TkMap>,
    inner: Mutex<Inner>,
    loan: Arc<LoanPool>,
}

impl ReaderHistoryCache {
    /// Build from the reader's QoS snapshot and the shared key map.
    #[must_use]
    pub fn new(qos: &Qos, tkmap: Arc<TkMap>) -> Self {
        Self {
            history: qos.history,
            tkmap,
            inner: Mutex::new(Inner {
                instances: BTreeMap::new(),
                rr_cursor: 0,
                conditions: Vec::new(),
                queries: Vec::new(),
            }),
            loan: Arc::new(LoanPool::default()),
        }
    }

    /// Store one delivered sample, applying write/dispose/unregister
    /// semantics and re-evaluating attached conditions.
    pub fn store(
        &self,
        writer: Guid,
        seq: u64,
        serdata: SerializedSample,
        state: WriteState,
        timestamp: Wtime,
    ) -> Result<InstanceHandle> {
        let mut inner = self.inner.lock();

        let raw = match self.instance_for(&mut inner, &serdata, state) {
            Some(raw) => raw,
            None => return Ok(InstanceHandle::NIL), // unregister of unknown key
        };

        {
            let queries = query_slots(&inner);
            let Some(instance) = inner.instances.get_mut(&raw) else {
                return Err(Error::PreconditionNotMet);
            };

            if state.has_data() {
                match instance.istate {
                    InstanceState::NotAliveDisposed => {
                        instance.disposed_generation += 1;
                        instance.view = ViewState::New;
                        instance.istate = InstanceState::Alive;
                    }
                    InstanceState::NotAliveNoWriters => {
                        instance.no_writers_generation += 1;
                        instance.view = ViewState::New;
                        instance.istate = InstanceState::Alive;
                    }
                    InstanceState::Alive => {}
                }
                instance.live_writers.insert(writer);
                let query_matches = query_match_bits(&queries, &serdata);
                instance.samples.push_back(RhcSample {
                    serdata,
                    seq,
                    writer,
                    timestamp,
                    read: false,
                    valid: true,
                    disposed_generation: instance.disposed_generation,
                    no_writers_generation: instance.no_writers_generation,
                    query_matches,
                });
                if let History::KeepLast(depth) = self.history {
                    while instance.valid_count() > depth as usize {
                        if let Some(pos) = instance.samples.iter().position(|s| s.valid) {
                            instance.samples.remove(pos);
                        }
                    }
                }
            }

            if state.disposes() && instance.istate == InstanceState::Alive {
                instance.istate = InstanceState::NotAliveDisposed;
                if !state.has_data() {
                    push_invalid(instance, writer, seq, timestamp);
                }
            }

            if state == WriteState::Unregister {
                instance.live_writers.remove(&writer);
                if instance.live_writers.is_empty() && instance.istate == InstanceState::Alive {
                    instance.istate = InstanceState::NotAliveNoWriters;
                    push_invalid(instance, writer, seq, timestamp);
                }
            }
        }

        self.eval_conditions(&mut inner);
        Ok(InstanceHandle::from_raw(raw))
    }

    /// A matched writer disappeared: remove it from every instance and
    /// transition writerless alive instances to `NOT_ALIVE_NO_WRITERS`.
    pub fn writer_gone(&self, writer: &Guid) {
        let mut inner = self.inner.lock();
        for instance in inner.instances.values_mut() {
            if instance.live_writers.remove(writer)
                && instance.live_writers.is_empty()
                && instance.istate == InstanceState::Alive
            {
                instance.istate = InstanceState::NotAliveNoWriters;
                push_invalid(instance, *writer, 0, Wtime(0));
            }
        }
        self.eval_conditions(&mut inner);
    }

    /// Non-destructive read of at most `max` matching samples.
    pub fn read(
        &self,
        max: usize,
        masks: StateMasks,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, masks, instance, None, false)
    }

    /// Destructive read: matching samples are removed from the cache.
    pub fn take(
        &self,
        max: usize,
        masks: StateMasks,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, masks, instance, None, true)
    }

    /// `take` variant surfacing the raw serialized buffers (the cache never
    /// deserializes, so this is the same walk without the decode contract).
    pub fn take_serialized(
        &self,
        max: usize,
        masks: StateMasks,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, masks, instance, None, true)
    }

    /// Read through a condition's masks.
    pub fn read_w_condition(
        &self,
        max: usize,
        cond: &ReadCondition,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, cond.masks(), instance, None, false)
    }

    /// Take through a condition's masks.
    pub fn take_w_condition(
        &self,
        max: usize,
        cond: &ReadCondition,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, cond.masks(), instance, None, true)
    }

    /// Read through a query condition: masks plus content predicate.
    pub fn read_w_query(
        &self,
        max: usize,
        query: &QueryCondition,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, query.masks(), instance, Some(query), false)
    }

    /// Take through a query condition.
    pub fn take_w_query(
        &self,
        max: usize,
        query: &QueryCondition,
        instance: Option<InstanceHandle>,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        self.collect(max, query.masks(), instance, Some(query), true)
    }

    /// Read into the reader's loan buffer; the loan returns to the cache
    /// when the result is dropped. A second overlapping loan falls back to a
    /// fresh allocation.
    pub fn read_loaned(&self, max: usize, masks: StateMasks) -> Result<LoanedSamples> {
        let items = self.collect(max, masks, None, None, false)?;
        Ok(LoanPool::fill(&self.loan, items))
    }

    /// Attach a read condition; its trigger is evaluated immediately.
    pub fn add_read_condition(&self, cond: Arc<ReadCondition>) {
        let mut inner = self.inner.lock();
        inner.conditions.push(cond);
        self.eval_conditions(&mut inner);
    }

    /// Detach a read condition by id.
    pub fn remove_read_condition(&self, cond: &ReadCondition) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.conditions.len();
        inner.conditions.retain(|c| c.id() != cond.id());
        inner.conditions.len() != before
    }

    /// Attach a query condition, assigning a match-bit slot and evaluating
    /// the predicate over already-stored samples.
    pub fn add_query_condition(&self, query: Arc<QueryCondition>) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = match inner.queries.iter().position(Option::is_none) {
            Some(free) => {
                inner.queries[free] = Some(query.clone());
                free
            }
            None if inner.queries.len() < 32 => {
                inner.queries.push(Some(query.clone()));
                inner.queries.len() - 1
            }
            None => return Err(Error::PreconditionNotMet),
        };
        query.set_slot(slot);
        let bit = 1u32 << slot;
        for instance in inner.instances.values_mut() {
            for sample in instance.samples.iter_mut() {
                if sample.valid && query.matches(&sample.serdata) {
                    sample.query_matches |= bit;
                } else {
                    sample.query_matches &= !bit;
                }
            }
        }
        self.eval_conditions(&mut inner);
        Ok(())
    }

    /// Detach a query condition, clearing its match bits.
    pub fn remove_query_condition(&self, query: &QueryCondition) -> bool {
        let mut inner = self.inner.lock();
        let slot = query.slot();
        let Some(stored) = inner
            .queries
            .iter_mut()
            .find(|q| q.as_ref().is_some_and(|q| q.id() == query.id()))
        else {
            return false;
        };
        *stored = None;
        if slot < 32 {
            let bit = 1u32 << slot;
            for instance in inner.instances.values_mut() {
                for sample in instance.samples.iter_mut() {
                    sample.query_matches &= !bit;
                }
            }
        }
        true
    }

    /// Number of live instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.inner.lock().instances.len()
    }

    /// Number of resident samples (valid and invalid).
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.inner.lock().instances.values().map(|i| i.samples.len()).sum()
    }

    /// Diagnostics snapshot for the debug monitor.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RhcInstanceSnapshot> {
        let inner = self.inner.lock();
        inner
            .instances
            .values()
            .map(|i| RhcInstanceSnapshot {
                handle: i.entry.handle(),
                istate: i.istate,
                view: i.view,
                samples: i.samples.len(),
                unread: i.samples.iter().filter(|s| !s.read).count(),
            })
            .collect()
    }

    /// Resolve (or create) the instance for a stored sample; `None` means
    /// the sample addresses an unknown instance and can be dropped.
    fn instance_for(
        &self,
        inner: &mut Inner,
        serdata: &SerializedSample,
        state: WriteState,
    ) -> Option<u64> {
        let known = self.tkmap.lookup(serdata);
        if !known.is_nil() && inner.instances.contains_key(&known.raw()) {
            return Some(known.raw());
        }
        if state == WriteState::Unregister {
            return None;
        }
        let entry = self.tkmap.find(serdata, true)?;
        let raw = entry.handle().raw();
        inner.instances.insert(
            raw,
            Instance {
                entry,
                samples: VecDeque::new(),
                view: ViewState::New,
                istate: InstanceState::Alive,
                disposed_generation: 0,
                no_writers_generation: 0,
                live_writers: BTreeSet::new(),
            },
        );
        Some(raw)
    }

    fn collect(
        &self,
        max: usize,
        masks: StateMasks,
        instance: Option<InstanceHandle>,
        query: Option<&QueryCondition>,
        take: bool,
    ) -> Result<Vec<(SampleInfo, SerializedSample)>> {
        if max == 0 {
            return Err(Error::BadParameter);
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // Visit order: the requested instance alone, or all instances
        // round-robin starting after the last one served.
        let handles: Vec<u64> = match instance {
            Some(h) => {
                if !inner.instances.contains_key(&h.raw()) {
                    return Err(Error::PreconditionNotMet);
                }
                vec![h.raw()]
            }
            None => {
                let keys: Vec<u64> = inner.instances.keys().copied().collect();
                let pivot = keys.partition_point(|&k| k <= inner.rr_cursor);
                keys[pivot..].iter().chain(keys[..pivot].iter()).copied().collect()
            }
        };

        let mut out = Vec::new();
        let mut drained: Vec<u64> = Vec::new();
        for raw in handles {
            if out.len() >= max {
                break;
            }
            let Some(inst) = inner.instances.get_mut(&raw) else {
                continue;
            };
            if !masks.view.intersects(inst.view.mask())
                || !masks.instance.intersects(inst.istate.mask())
            {
                continue;
            }

            let mut touched = false;
            let mut idx = 0;
            while idx < inst.samples.len() && out.len() < max {
                let matches = {
                    let s = &inst.samples[idx];
                    let sstate = if s.read { SampleState::Read } else { SampleState::NotRead };
                    masks.sample.intersects(sstate.mask())
                        && query.is_none_or(|q| query_hit(q, s))
                };
                if !matches {
                    idx += 1;
                    continue;
                }
                let info = {
                    let s = &inst.samples[idx];
                    SampleInfo {
                        sample_state: if s.read { SampleState::Read } else { SampleState::NotRead },
                        view_state: inst.view,
                        instance_state: inst.istate,
                        disposed_generation_count: s.disposed_generation,
                        no_writers_generation_count: s.no_writers_generation,
                        source_timestamp: s.timestamp,
                        sequence: s.seq,
                        writer: s.writer,
                        instance_handle: inst.entry.handle(),
                        valid_data: s.valid,
                    }
                };
                touched = true;
                if take {
                    let s = inst.samples.remove(idx).map(|s| s.serdata);
                    if let Some(serdata) = s {
                        out.push((info, serdata));
                    }
                    // idx now addresses the next sample, no increment.
                } else {
                    inst.samples[idx].read = true;
                    out.push((info, inst.samples[idx].serdata.clone()));
                    idx += 1;
                }
            }

            if touched {
                inst.view = ViewState::NotNew;
                inner.rr_cursor = raw;
                if take && inst.samples.is_empty() && inst.istate != InstanceState::Alive {
                    drained.push(raw);
                }
            }
        }

        for raw in drained {
            if let Some(inst) = inner.instances.remove(&raw) {
                self.tkmap.unref(&inst.entry);
            }
        }

        if !out.is_empty() {
            self.eval_conditions(inner);
        }
        Ok(out)
    }

    fn eval_conditions(&self, inner: &mut Inner) {
        let conditions = inner.conditions.clone();
        for cond in conditions {
            let value = trigger_value(inner, cond.masks(), None);
            cond.set_trigger(value);
        }
        let queries: Vec<Arc<QueryCondition>> = inner.queries.iter().flatten().cloned().collect();
        for query in queries {
            let value = trigger_value(inner, query.masks(), Some(&query));
            query.set_trigger(value);
        }
    }
}

impl Drop for ReaderHistoryCache {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let raws: Vec<u64> = inner.instances.keys().copied().collect();
        for raw in raws {
            if let Some(inst) = inner.instances.remove(&raw) {
                self.tkmap.unref(&inst.entry);
            }
        }
    }
}

/// Per-instance diagnostics row.
#[derive(Debug, Clone, Copy)]
pub struct RhcInstanceSnapshot {
    pub handle: InstanceHandle,
    pub istate: InstanceState,
    pub view: ViewState,
    pub samples: usize,
    pub unread: usize,
}

fn trigger_value(inner: &Inner, masks: StateMasks, query: Option<&QueryCondition>) -> bool {
    inner.instances.values().any(|inst| {
        masks.view.intersects(inst.view.mask())
            && masks.instance.intersects(inst.istate.mask())
            && inst.samples.iter().any(|s| {
                let sstate = if s.read { SampleState::Read } else { SampleState::NotRead };
                masks.sample.intersects(sstate.mask()) && query.is_none_or(|q| query_hit(q, s))
            })
    })
}

fn query_hit(query: &QueryCondition, sample: &RhcSample) -> bool {
    let slot = query.slot();
    if slot < 32 {
        sample.query_matches & (1 << slot) != 0
    } else {
        // Unattached query: evaluate the predicate directly.
        sample.valid && query.matches(&sample.serdata)
    }
}

fn query_slots(inner: &Inner) -> Vec<(usize, Arc<QueryCondition>)> {
    inner
        .queries
        .iter()
        .enumerate()
        .filter_map(|(i, q)| q.clone().map(|q| (i, q)))
        .collect()
}

fn query_match_bits(queries: &[(usize, Arc<QueryCondition>)], serdata: &SerializedSample) -> u32 {
    let mut bits = 0;
    for (slot, query) in queries {
        if query.matches(serdata) {
            bits |= 1 << slot;
        }
    }
    bits
}

/// Append the synthetic invalid sample that carries an instance-state
/// transition when the queue holds no data sample to carry it. At most one
/// trailing invalid sample is kept.
fn push_invalid(instance: &mut Instance, writer: Guid, seq: u64, timestamp: Wtime) {
    if instance.samples.back().is_some_and(|s| !s.valid) {
        return;
    }
    let key = instance.entry.key().clone();
    instance.samples.push_back(RhcSample {
        serdata: SerializedSample::key_only(key),
        seq,
        writer,
        timestamp,
        read: false,
        valid: false,
        disposed_generation: instance.disposed_generation,
        no_writers_generation: instance.no_writers_generation,
        query_matches: 0,
    });
}

// ============================================================================
// Loan buffer
// ============================================================================

/// The reader's single cached loan allocation.
#[derive(Default)]
pub struct LoanPool {
    slot: Mutex<Option<Vec<(SampleInfo, SerializedSample)>>>,
    out: AtomicBool,
}

impl LoanPool {
    fn fill(pool: &Arc<LoanPool>, items: Vec<(SampleInfo, SerializedSample)>) -> LoanedSamples {
        if pool
            .out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let mut buf = pool.slot.lock().take().unwrap_or_default();
            buf.clear();
            buf.extend(items);
            LoanedSamples {
                items: buf,
                pool: Some(pool.clone()),
            }
        } else {
            // Loan already out: overlapping read gets its own allocation.
            LoanedSamples { items, pool: None }
        }
    }

    /// True while a caller holds the pooled buffer.
    #[must_use]
    pub fn is_out(&self) -> bool {
        self.out.load(Ordering::Acquire)
    }
}

/// Samples borrowed from the reader; returning the loan is the drop.
pub struct LoanedSamples {
    items: Vec<(SampleInfo, SerializedSample)>,
    pool: Option<Arc<LoanPool>>,
}

impl Deref for LoanedSamples {
    type Target = [(SampleInfo, SerializedSample)];

    fn deref(&self) -> &Self::Target {
        &self.items
    }
}

impl Drop for LoanedSamples {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut buf = std::mem::take(&mut self.items);
            buf.clear();
            *pool.slot.lock() = Some(buf);
            pool.out.store(false, Ordering::Release);
        }
    }
}
