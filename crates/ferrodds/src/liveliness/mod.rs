// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lease manager: timer-driven liveliness expiration.
//!
//! Every leased entity holds one [`Lease`]; leases with a finite deadline sit
//! in a fibonacci heap keyed by their scheduled check time. Renewals touch
//! only the deadline, never the heap position: `expire_due` re-checks each
//! popped lease and reinserts it when it was renewed in the meantime. Two
//! lock levels, acquired heap-then-shard:
//!
//! - the heap mutex guards heap structure and scheduled times,
//! - a small array of sharded mutexes (indexed by a hash of the lease
//!   address) guards each lease's deadline, so renewals on distinct leases
//!   do not serialise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{LEASE_RESCUE_INTERVAL, N_LEASE_LOCKS};
use crate::core::fibheap::{FibHeap, NodeId};
use crate::core::guid::Guid;
use crate::core::time::{Dur, Mtime, T_NEVER};
use crate::entity::EntityKind;

/// Invoked from `expire_due` once per expired lease, with no lease-subsystem
/// lock held.
pub trait LeaseExpiryHandler {
    /// Rescue probe for an expired proxy participant: true iff the proxy
    /// still exists and its privileged participant resolves to a live proxy.
    fn privileged_alive(&self, proxy_pp: &Guid) -> bool;

    /// Delete the entity whose lease expired.
    fn on_lease_expired(&self, kind: EntityKind, guid: &Guid);
}

/// A time-bounded liveliness assertion for one entity.
#[derive(Debug)]
pub struct Lease {
    guid: Guid,
    kind: EntityKind,
    tdur: Dur,
    /// Deadline; read-modify-write only under the sharded lease lock.
    tend: AtomicI64,
}

impl Lease {
    /// GUID of the leased entity.
    #[must_use]
    pub fn guid(&self) -> &Guid {
        &self.guid
    }

    /// Entity kind dispatched to on expiry.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Renewal duration.
    #[must_use]
    pub fn duration(&self) -> Dur {
        self.tdur
    }

    /// Current deadline (diagnostics; racy outside the shard lock).
    #[must_use]
    pub fn deadline(&self) -> Mtime {
        Mtime(self.tend.load(Ordering::Relaxed))
    }
}

struct HeapState {
    queue: FibHeap<Arc<Lease>>,
    /// Lease address -> heap node, for the leases currently scheduled.
    nodes: HashMap<usize, NodeId>,
}

/// The lease subsystem.
pub struct LeaseManager {
    heap: Mutex<HeapState>,
    shards: Vec<Mutex<()>>,
    /// GC wakeup: forces the expiry thread to re-evaluate its sleep.
    wake: Box<dyn Fn() + Send + Sync>,
}

impl LeaseManager {
    /// Create the manager; `wake` is invoked whenever the earliest deadline
    /// may have moved.
    pub fn new(wake: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            heap: Mutex::new(HeapState {
                queue: FibHeap::new(),
                nodes: HashMap::new(),
            }),
            shards: (0..N_LEASE_LOCKS).map(|_| Mutex::new(())).collect(),
            wake,
        }
    }

    /// Create a lease that is live but not yet scheduled.
    pub fn create(&self, guid: Guid, kind: EntityKind, texpire: Mtime, tdur: Dur) -> Arc<Lease> {
        log::trace!("[lease] new lease for {guid} (kind {kind:?}, dur {}ns)", tdur.0);
        Arc::new(Lease {
            guid,
            kind,
            tdur,
            tend: AtomicI64::new(texpire.0),
        })
    }

    /// Schedule a lease. A `T_NEVER` deadline keeps the lease live but off
    /// the heap.
    pub fn register(&self, lease: &Arc<Lease>) {
        {
            let mut heap = self.heap.lock();
            let _shard = self.shard(lease).lock();
            let tend = lease.tend.load(Ordering::Relaxed);
            if tend != T_NEVER {
                let id = heap.queue.insert(tend, lease.clone());
                heap.nodes.insert(lease_addr(lease), id);
            }
        }
        // The expiry thread can only wake up in time if it re-evaluates now.
        (self.wake)();
    }

    /// Extend the deadline to `now + duration`. No-op when the extension
    /// would move the deadline backwards or the lease is already expired.
    pub fn renew(&self, lease: &Arc<Lease>, now: Mtime) {
        let tend_new = now.add_dur(lease.tdur);
        let _shard = self.shard(lease).lock();
        let tend = lease.tend.load(Ordering::Relaxed);
        if tend_new.0 <= tend || now.0 >= tend {
            return;
        }
        lease.tend.store(tend_new.0, Ordering::Relaxed);
        log::trace!("[lease] renew {} until {}", lease.guid, tend_new.0);
    }

    /// Override the deadline. Moves the scheduled check forward when needed
    /// and schedules an unscheduled lease with a finite deadline.
    pub fn set_expiry(&self, lease: &Arc<Lease>, when: Mtime) {
        let trigger = {
            let mut heap = self.heap.lock();
            let _shard = self.shard(lease).lock();
            lease.tend.store(when.0, Ordering::Relaxed);
            match heap.nodes.get(&lease_addr(lease)).copied() {
                Some(id) => {
                    let scheduled = heap.queue.key(id).unwrap_or(T_NEVER);
                    if when.0 < scheduled {
                        heap.queue.decrease_key(id, when.0);
                        true
                    } else {
                        false
                    }
                }
                None if when.0 < T_NEVER => {
                    let id = heap.queue.insert(when.0, lease.clone());
                    heap.nodes.insert(lease_addr(lease), id);
                    true
                }
                None => false,
            }
        };
        if trigger {
            (self.wake)();
        }
    }

    /// Drop a lease, removing it from the heap if scheduled.
    pub fn free(&self, lease: &Arc<Lease>) {
        {
            let mut heap = self.heap.lock();
            if let Some(id) = heap.nodes.remove(&lease_addr(lease)) {
                heap.queue.remove(id);
            }
        }
        log::trace!("[lease] free {}", lease.guid);
        (self.wake)();
    }

    /// Process all leases due at `now`; returns the time until the next
    /// scheduled check (`Dur::NEVER` when the heap is empty).
    ///
    /// An expired proxy participant whose privileged participant is still
    /// live is re-armed for [`LEASE_RESCUE_INTERVAL`] instead of deleted:
    /// transient asymmetric loss on the discovery channel must not cascade
    /// into deleting dependent proxies.
    pub fn expire_due(&self, now: Mtime, handler: &dyn LeaseExpiryHandler) -> Dur {
        let mut heap = self.heap.lock();
        loop {
            let Some((key, _)) = heap.queue.peek_min() else {
                break;
            };
            if key > now.0 {
                break;
            }
            let Some((_, lease)) = heap.queue.extract_min() else {
                break;
            };
            heap.nodes.remove(&lease_addr(&lease));

            let shard = self.shard(&lease);
            let guard = shard.lock();
            let tend = lease.tend.load(Ordering::Relaxed);
            if now.0 < tend {
                // Renewed since it was scheduled: push the check out.
                if tend != T_NEVER {
                    let id = heap.queue.insert(tend, lease.clone());
                    heap.nodes.insert(lease_addr(&lease), id);
                }
                drop(guard);
                continue;
            }

            if lease.kind == EntityKind::ProxyParticipant
                && handler.privileged_alive(&lease.guid)
            {
                let rearm = now.add_dur(LEASE_RESCUE_INTERVAL);
                lease.tend.store(rearm.0, Ordering::Relaxed);
                let id = heap.queue.insert(rearm.0, lease.clone());
                heap.nodes.insert(lease_addr(&lease), id);
                log::debug!(
                    "[lease] {} expired but privileged participant still live, re-armed",
                    lease.guid
                );
                drop(guard);
                continue;
            }
            drop(guard);

            log::debug!(
                "[lease] expired: {} (kind {:?}, tend {} <= now {})",
                lease.guid,
                lease.kind,
                tend,
                now.0
            );
            let (kind, guid) = (lease.kind, lease.guid);
            // Entity deletion takes entity locks; never call it under the
            // heap mutex.
            drop(heap);
            handler.on_lease_expired(kind, &guid);
            heap = self.heap.lock();
        }

        heap.queue
            .peek_min()
            .map_or(Dur::NEVER, |(key, _)| Dur((key - now.0).max(0)))
    }

    /// Number of scheduled leases (diagnostics).
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.heap.lock().queue.len()
    }

    fn shard(&self, lease: &Arc<Lease>) -> &Mutex<()> {
        let u = (lease_addr(lease) >> 3) as u32;
        let v = u.wrapping_mul(0xb481_7365);
        let idx = (v as usize) % self.shards.len();
        &self.shards[idx]
    }
}

fn lease_addr(lease: &Arc<Lease>) -> usize {
    Arc::as_ptr(lease) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        expired: PlMutex<Vec<(EntityKind, Guid)>>,
        privileged_live: bool,
    }

    impl Recorder {
        fn new(privileged_live: bool) -> Self {
            Self {
                expired: PlMutex::new(Vec::new()),
                privileged_live,
            }
        }
    }

    impl LeaseExpiryHandler for Recorder {
        fn privileged_alive(&self, _proxy_pp: &Guid) -> bool {
            self.privileged_live
        }

        fn on_lease_expired(&self, kind: EntityKind, guid: &Guid) {
            self.expired.lock().push((kind, *guid));
        }
    }

    fn manager() -> LeaseManager {
        LeaseManager::new(Box::new(|| {}))
    }

    fn guid(n: u8) -> Guid {
        Guid::from_bytes([n; 16])
    }

    #[test]
    fn test_expire_due_fires_and_reports_next() {
        let lm = manager();
        let handler = Recorder::new(false);
        let lease = lm.create(
            guid(1),
            EntityKind::ProxyWriter,
            Mtime(1_000),
            Dur::from_millis(1),
        );
        lm.register(&lease);

        // Not yet due.
        let delay = lm.expire_due(Mtime(500), &handler);
        assert_eq!(delay, Dur(500));
        assert!(handler.expired.lock().is_empty());

        // Due now.
        let delay = lm.expire_due(Mtime(1_000), &handler);
        assert!(delay.is_never());
        assert_eq!(
            handler.expired.lock().as_slice(),
            &[(EntityKind::ProxyWriter, guid(1))]
        );
        assert_eq!(lm.scheduled(), 0);
    }

    #[test]
    fn test_renew_defers_expiry() {
        let lm = manager();
        let handler = Recorder::new(false);
        let lease = lm.create(
            guid(2),
            EntityKind::ProxyParticipant,
            Mtime(1_000),
            Dur(2_000),
        );
        lm.register(&lease);
        lm.renew(&lease, Mtime(500)); // deadline moves to 2500

        let delay = lm.expire_due(Mtime(1_000), &handler);
        assert!(handler.expired.lock().is_empty());
        // Re-scheduled at the renewed deadline.
        assert_eq!(delay, Dur(1_500));
    }

    #[test]
    fn test_renew_never_moves_deadline_backwards() {
        let lm = manager();
        let lease = lm.create(guid(3), EntityKind::Writer, Mtime(10_000), Dur(1_000));
        // now + dur = 1500 < current deadline: no-op.
        lm.renew(&lease, Mtime(500));
        assert_eq!(lease.deadline(), Mtime(10_000));
    }

    #[test]
    fn test_renew_of_expired_lease_is_noop() {
        let lm = manager();
        let lease = lm.create(guid(4), EntityKind::Writer, Mtime(100), Dur(1_000_000));
        // now >= deadline: lease already expired, renewal must not revive it.
        lm.renew(&lease, Mtime(200));
        assert_eq!(lease.deadline(), Mtime(100));
    }

    #[test]
    fn test_set_expiry_pulls_check_forward() {
        let lm = manager();
        let handler = Recorder::new(false);
        let lease = lm.create(guid(5), EntityKind::ProxyReader, Mtime(100_000), Dur(1));
        lm.register(&lease);
        lm.set_expiry(&lease, Mtime(50));

        lm.expire_due(Mtime(60), &handler);
        assert_eq!(handler.expired.lock().len(), 1);
    }

    #[test]
    fn test_set_expiry_schedules_unscheduled_lease() {
        let lm = manager();
        let lease = lm.create(guid(6), EntityKind::Participant, Mtime::NEVER, Dur::NEVER);
        lm.register(&lease);
        assert_eq!(lm.scheduled(), 0);
        lm.set_expiry(&lease, Mtime(1_000));
        assert_eq!(lm.scheduled(), 1);
    }

    #[test]
    fn test_privileged_rescue_rearms() {
        let lm = manager();
        let handler = Recorder::new(true);
        let lease = lm.create(guid(7), EntityKind::ProxyParticipant, Mtime(1_000), Dur(500));
        lm.register(&lease);

        let delay = lm.expire_due(Mtime(1_000), &handler);
        // Not deleted; re-armed for the rescue interval.
        assert!(handler.expired.lock().is_empty());
        assert_eq!(delay, LEASE_RESCUE_INTERVAL);
        assert_eq!(lm.scheduled(), 1);

        // Second deadline with the privileged participant gone: deleted.
        let handler2 = Recorder::new(false);
        let t2 = Mtime(1_000).add_dur(LEASE_RESCUE_INTERVAL);
        lm.expire_due(t2, &handler2);
        assert_eq!(handler2.expired.lock().len(), 1);
    }

    #[test]
    fn test_rescued_lease_survives_on_renewal() {
        let lm = manager();
        let handler = Recorder::new(true);
        let lease = lm.create(guid(8), EntityKind::ProxyParticipant, Mtime(1_000), Dur::from_secs(1));
        lm.register(&lease);
        lm.expire_due(Mtime(1_000), &handler);

        // PMD arrives within the rescue window.
        lm.renew(&lease, Mtime(1_001));
        let handler2 = Recorder::new(false);
        let t2 = Mtime(1_000).add_dur(LEASE_RESCUE_INTERVAL);
        let _ = lm.expire_due(t2, &handler2);
        // Renewed deadline (1_001 + 1s) is past t2: still alive.
        assert!(handler2.expired.lock().is_empty());
        assert_eq!(lm.scheduled(), 1);
    }

    #[test]
    fn test_free_removes_from_heap() {
        let lm = manager();
        let lease = lm.create(guid(9), EntityKind::Reader, Mtime(1_000), Dur(1));
        lm.register(&lease);
        assert_eq!(lm.scheduled(), 1);
        lm.free(&lease);
        assert_eq!(lm.scheduled(), 0);
    }

    #[test]
    fn test_never_lease_not_scheduled() {
        let lm = manager();
        let lease = lm.create(guid(10), EntityKind::Participant, Mtime::NEVER, Dur::NEVER);
        lm.register(&lease);
        assert_eq!(lm.scheduled(), 0);
    }
}
