// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local participants and discovered proxy participants.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::guid::Guid;
use crate::liveliness::Lease;
use crate::qos::Qos;
use crate::transport::AddrSet;

/// Root of the local node: owns default QoS, its own liveliness lease, the
/// set of local endpoints, and the address set peers use to reach it.
pub struct Participant {
    pub guid: Guid,
    pub default_qos: Qos,
    pub addrset: AddrSet,
    lease: Mutex<Option<Arc<Lease>>>,
    endpoints: Mutex<BTreeSet<Guid>>,
    deleted: AtomicBool,
}

impl Participant {
    /// Create a participant; the lease is attached once registered.
    #[must_use]
    pub fn new(guid: Guid, default_qos: Qos) -> Self {
        Self {
            guid,
            default_qos,
            addrset: AddrSet::new(),
            lease: Mutex::new(None),
            endpoints: Mutex::new(BTreeSet::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Attach the participant's own liveliness lease.
    pub fn set_lease(&self, lease: Arc<Lease>) {
        *self.lease.lock() = Some(lease);
    }

    /// The participant's lease, once attached.
    #[must_use]
    pub fn lease(&self) -> Option<Arc<Lease>> {
        self.lease.lock().clone()
    }

    /// Record a created endpoint.
    pub fn add_endpoint(&self, guid: Guid) {
        self.endpoints.lock().insert(guid);
    }

    /// Forget a deleted endpoint.
    pub fn remove_endpoint(&self, guid: &Guid) {
        self.endpoints.lock().remove(guid);
    }

    /// Snapshot of the participant's endpoint GUIDs.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Guid> {
        self.endpoints.lock().iter().copied().collect()
    }

    /// First phase of deletion: mark closed. Returns false if already marked.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

/// Remote counterpart of a [`Participant`], discovered via SPDP.
pub struct ProxyParticipant {
    pub guid: Guid,
    /// Another proxy participant writing discovery data on this one's
    /// behalf; while it is live, this proxy's lease expiry is deferred.
    pub privileged_pp_guid: Option<Guid>,
    pub qos: Qos,
    pub addrset: AddrSet,
    lease: Mutex<Option<Arc<Lease>>>,
    endpoints: Mutex<BTreeSet<Guid>>,
    deleted: AtomicBool,
}

impl ProxyParticipant {
    /// Create from a received SPDP announcement.
    #[must_use]
    pub fn new(guid: Guid, privileged_pp_guid: Option<Guid>, qos: Qos) -> Self {
        Self {
            guid,
            privileged_pp_guid,
            qos,
            addrset: AddrSet::new(),
            lease: Mutex::new(None),
            endpoints: Mutex::new(BTreeSet::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Attach the lease renewed by SPDP/PMD traffic.
    pub fn set_lease(&self, lease: Arc<Lease>) {
        *self.lease.lock() = Some(lease);
    }

    /// The proxy's lease, once attached.
    #[must_use]
    pub fn lease(&self) -> Option<Arc<Lease>> {
        self.lease.lock().clone()
    }

    /// Record a discovered proxy endpoint.
    pub fn add_endpoint(&self, guid: Guid) {
        self.endpoints.lock().insert(guid);
    }

    /// Forget a deleted proxy endpoint.
    pub fn remove_endpoint(&self, guid: &Guid) {
        self.endpoints.lock().remove(guid);
    }

    /// Snapshot of the proxy's endpoint GUIDs.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Guid> {
        self.endpoints.lock().iter().copied().collect()
    }

    /// First phase of deletion: mark closed. Returns false if already marked.
    pub fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// True once deletion started.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{GuidPrefix, ENTITYID_PARTICIPANT};

    fn guid(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), ENTITYID_PARTICIPANT)
    }

    #[test]
    fn test_endpoint_bookkeeping() {
        let pp = Participant::new(guid(1), Qos::default());
        let w = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);
        pp.add_endpoint(w);
        assert_eq!(pp.endpoints(), vec![w]);
        pp.remove_endpoint(&w);
        assert!(pp.endpoints().is_empty());
    }

    #[test]
    fn test_mark_deleted_is_once() {
        let pp = ProxyParticipant::new(guid(2), Some(guid(3)), Qos::default());
        assert!(!pp.is_deleted());
        assert!(pp.mark_deleted());
        assert!(!pp.mark_deleted());
        assert!(pp.is_deleted());
    }
}
