// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read and query conditions attached to a reader history cache.
//!
//! A condition's trigger is recomputed by the cache on every state change;
//! waiters block on the condition's own signal, so no cache lock is held
//! while an application waits.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::core::serdata::SerializedSample;
use crate::core::time::Dur;

/// Sample state mask (read / not-read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleStateMask(u32);

impl SampleStateMask {
    /// Sample has been returned by a previous read.
    pub const READ: SampleStateMask = SampleStateMask(1 << 0);
    /// Sample has never been returned.
    pub const NOT_READ: SampleStateMask = SampleStateMask(1 << 1);
    /// Any sample state.
    pub const ANY: SampleStateMask = SampleStateMask(Self::READ.0 | Self::NOT_READ.0);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True iff the masks share a bit.
    #[must_use]
    pub const fn intersects(self, other: SampleStateMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for SampleStateMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        SampleStateMask(self.0 | rhs.0)
    }
}

/// View state mask (new / not-new instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewStateMask(u32);

impl ViewStateMask {
    /// Instance is new (or reborn) and unobserved.
    pub const NEW: ViewStateMask = ViewStateMask(1 << 0);
    /// Instance has been observed since its last (re)birth.
    pub const NOT_NEW: ViewStateMask = ViewStateMask(1 << 1);
    /// Any view state.
    pub const ANY: ViewStateMask = ViewStateMask(Self::NEW.0 | Self::NOT_NEW.0);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True iff the masks share a bit.
    #[must_use]
    pub const fn intersects(self, other: ViewStateMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ViewStateMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        ViewStateMask(self.0 | rhs.0)
    }
}

/// Instance state mask (alive / disposed / no-writers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStateMask(u32);

impl InstanceStateMask {
    /// Instance has live writers.
    pub const ALIVE: InstanceStateMask = InstanceStateMask(1 << 0);
    /// Instance was disposed by a writer.
    pub const NOT_ALIVE_DISPOSED: InstanceStateMask = InstanceStateMask(1 << 1);
    /// Instance lost its last writer without a dispose.
    pub const NOT_ALIVE_NO_WRITERS: InstanceStateMask = InstanceStateMask(1 << 2);
    /// Any instance state.
    pub const ANY: InstanceStateMask = InstanceStateMask(
        Self::ALIVE.0 | Self::NOT_ALIVE_DISPOSED.0 | Self::NOT_ALIVE_NO_WRITERS.0,
    );

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True iff the masks share a bit.
    #[must_use]
    pub const fn intersects(self, other: InstanceStateMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for InstanceStateMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        InstanceStateMask(self.0 | rhs.0)
    }
}

/// The `(sample, view, instance)` mask triple of a read or condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMasks {
    pub sample: SampleStateMask,
    pub view: ViewStateMask,
    pub instance: InstanceStateMask,
}

impl StateMasks {
    /// Match everything.
    pub const ANY: StateMasks = StateMasks {
        sample: SampleStateMask::ANY,
        view: ViewStateMask::ANY,
        instance: InstanceStateMask::ANY,
    };

    /// Unread samples of any instance.
    pub const NOT_READ: StateMasks = StateMasks {
        sample: SampleStateMask::NOT_READ,
        view: ViewStateMask::ANY,
        instance: InstanceStateMask::ANY,
    };
}

fn next_condition_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Trigger signal: one mutex/condvar pair per condition.
#[derive(Default)]
struct Signal {
    state: Mutex<bool>,
    cvar: Condvar,
}

/// Condition on the reader cache's sample/view/instance states.
pub struct ReadCondition {
    id: u64,
    masks: StateMasks,
    trigger: AtomicBool,
    signal: Signal,
}

impl ReadCondition {
    /// Create a condition with the given filter masks.
    #[must_use]
    pub fn new(masks: StateMasks) -> Arc<Self> {
        Arc::new(Self {
            id: next_condition_id(),
            masks,
            trigger: AtomicBool::new(false),
            signal: Signal::default(),
        })
    }

    /// Unique id (used for detach).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The condition's filter masks.
    #[must_use]
    pub fn masks(&self) -> StateMasks {
        self.masks
    }

    /// Current trigger value.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.trigger.load(Ordering::Acquire)
    }

    /// Block until the trigger is true or `timeout` elapses; returns the
    /// trigger value.
    pub fn wait(&self, timeout: Dur) -> bool {
        if self.triggered() {
            return true;
        }
        let mut state = self.signal.state.lock();
        if timeout.is_never() {
            while !*state {
                self.signal.cvar.wait(&mut state);
            }
            return true;
        }
        let deadline = std::time::Instant::now() + timeout.to_std();
        while !*state {
            if self.signal.cvar.wait_until(&mut state, deadline).timed_out() {
                return *state;
            }
        }
        true
    }

    /// Set the trigger, waking waiters on a rising edge.
    pub(crate) fn set_trigger(&self, value: bool) {
        let prev = self.trigger.swap(value, Ordering::AcqRel);
        let mut state = self.signal.state.lock();
        *state = value;
        if value && !prev {
            self.signal.cvar.notify_all();
        }
    }
}

/// Slot value of a query condition not attached to any cache.
pub(crate) const QUERY_UNATTACHED: usize = usize::MAX;

/// A read condition with an additional content predicate over the
/// serialized sample.
pub struct QueryCondition {
    cond: Arc<ReadCondition>,
    predicate: Box<dyn Fn(&SerializedSample) -> bool + Send + Sync>,
    /// Bit index into each sample's query-match mask, assigned on attach.
    slot: AtomicUsize,
}

impl QueryCondition {
    /// Create a query condition from masks and a predicate.
    #[must_use]
    pub fn new(
        masks: StateMasks,
        predicate: impl Fn(&SerializedSample) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            cond: ReadCondition::new(masks),
            predicate: Box::new(predicate),
            slot: AtomicUsize::new(QUERY_UNATTACHED),
        })
    }

    /// Unique id (shared with the inner read condition).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.cond.id()
    }

    /// The condition's filter masks.
    #[must_use]
    pub fn masks(&self) -> StateMasks {
        self.cond.masks()
    }

    /// Current trigger value.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.cond.triggered()
    }

    /// Block until triggered; see [`ReadCondition::wait`].
    pub fn wait(&self, timeout: Dur) -> bool {
        self.cond.wait(timeout)
    }

    /// Evaluate the predicate against a serialized sample.
    #[must_use]
    pub fn matches(&self, sample: &SerializedSample) -> bool {
        (self.predicate)(sample)
    }

    pub(crate) fn set_trigger(&self, value: bool) {
        self.cond.set_trigger(value);
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire)
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Release);
    }
}
