// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic/instance key map.
//!
//! One process-wide table from serialized key bytes to refcounted
//! [`InstanceHandle`]s. Writer-side registrations and reader-side stored
//! samples each hold a reference; the entry (and with it the handle) is
//! recycled only when the last reference drops. Handles carry a hidden kind
//! discriminator in the top byte so a handle of a different kind never
//! resolves here.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::serdata::SerializedSample;

/// Handle-kind discriminator for instance handles.
const HANDLE_KIND_INSTANCE: u64 = 0x49 << 56;

/// Opaque 64-bit instance handle, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// The nil handle.
    pub const NIL: InstanceHandle = InstanceHandle(0);

    /// Raw value (for display and map keys).
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True iff this is the nil handle.
    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    fn is_instance_kind(self) -> bool {
        self.0 & (0xFF << 56) == HANDLE_KIND_INSTANCE
    }

    /// Rehydrate a handle from a raw value previously obtained via
    /// [`InstanceHandle::raw`].
    pub(crate) fn from_raw(raw: u64) -> InstanceHandle {
        InstanceHandle(raw)
    }
}

/// One live instance key: handle, key bytes, reference count.
#[derive(Debug)]
pub struct TkEntry {
    handle: InstanceHandle,
    key: Arc<[u8]>,
    refc: AtomicU32,
}

impl TkEntry {
    /// The instance handle.
    #[must_use]
    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    /// The serialized key bytes this entry represents.
    #[must_use]
    pub fn key(&self) -> &Arc<[u8]> {
        &self.key
    }

    /// Current reference count (diagnostics only).
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refc.load(Ordering::Acquire)
    }

    /// Take a reference unless the entry is already dying (count at zero).
    fn try_ref(&self) -> bool {
        self.refc
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c != 0).then(|| c + 1)
            })
            .is_ok()
    }
}

/// Process-wide serialized-key to instance-handle map.
pub struct TkMap {
    by_key: DashMap<Arc<[u8]>, Arc<TkEntry>>,
    by_handle: DashMap<u64, Arc<TkEntry>>,
    next: AtomicU64,
}

impl Default for TkMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TkMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            by_handle: DashMap::new(),
            next: AtomicU64::new(0),
        }
    }

    /// Find the entry for a sample's key, taking a reference.
    ///
    /// With `create` set, a missing key is inserted with refcount 1;
    /// otherwise `None` is returned.
    pub fn find(&self, sample: &SerializedSample, create: bool) -> Option<Arc<TkEntry>> {
        loop {
            match self.by_key.entry(sample.key().clone()) {
                Entry::Occupied(occ) => {
                    let entry = occ.get().clone();
                    if entry.try_ref() {
                        return Some(entry);
                    }
                    // Lost the race with the final unref: drop the corpse and
                    // run the vacant path on the next iteration.
                    occ.remove();
                    self.by_handle
                        .remove_if(&entry.handle.raw(), |_, v| Arc::ptr_eq(v, &entry));
                }
                Entry::Vacant(vac) => {
                    if !create {
                        return None;
                    }
                    let handle = self.alloc_handle();
                    let entry = Arc::new(TkEntry {
                        handle,
                        key: sample.key().clone(),
                        refc: AtomicU32::new(1),
                    });
                    vac.insert(entry.clone());
                    self.by_handle.insert(handle.raw(), entry.clone());
                    log::trace!("[tkmap] new instance {:#x}", handle.raw());
                    return Some(entry);
                }
            }
        }
    }

    /// Non-mutating lookup: handle for a key, or `NIL` when unknown.
    #[must_use]
    pub fn lookup(&self, sample: &SerializedSample) -> InstanceHandle {
        self.by_key
            .get(sample.key())
            .map_or(InstanceHandle::NIL, |e| e.handle())
    }

    /// Reverse lookup by handle, taking a reference. Handles of a different
    /// kind (or stale handles) return `None`.
    pub fn find_by_id(&self, handle: InstanceHandle) -> Option<Arc<TkEntry>> {
        if !handle.is_instance_kind() {
            return None;
        }
        let entry = self.by_handle.get(&handle.raw()).map(|e| e.value().clone())?;
        entry.try_ref().then_some(entry)
    }

    /// Release one reference; the entry is freed when the count reaches zero.
    pub fn unref(&self, entry: &Arc<TkEntry>) {
        if entry.refc.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.by_key
                .remove_if(entry.key(), |_, v| Arc::ptr_eq(v, entry) && v.refcount() == 0);
            self.by_handle
                .remove_if(&entry.handle.raw(), |_, v| {
                    Arc::ptr_eq(v, entry) && v.refcount() == 0
                });
            log::trace!("[tkmap] freed instance {:#x}", entry.handle.raw());
        }
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// True iff no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn alloc_handle(&self) -> InstanceHandle {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        InstanceHandle(HANDLE_KIND_INSTANCE | (n & !(0xFF << 56)))
    }
}
