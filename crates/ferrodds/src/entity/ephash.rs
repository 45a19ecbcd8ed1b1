// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concurrent GUID -> entity map.
//!
//! One shard-locked map holds every live entity of the domain. Enumerators
//! return snapshots: they are consistent with respect to the map itself, not
//! with respect to mutation of the returned entities, which callers protect
//! with the entity's own mutex.

use dashmap::DashMap;
use std::sync::Arc;

use crate::core::guid::Guid;
use crate::core::{Error, Result};

use super::endpoint::{LocalReader, LocalWriter, ProxyReader, ProxyWriter};
use super::participant::{Participant, ProxyParticipant};
use super::EntityKind;

/// A reference to any hashed entity.
#[derive(Clone)]
pub enum EntityRef {
    Participant(Arc<Participant>),
    ProxyParticipant(Arc<ProxyParticipant>),
    Writer(Arc<LocalWriter>),
    Reader(Arc<LocalReader>),
    ProxyWriter(Arc<ProxyWriter>),
    ProxyReader(Arc<ProxyReader>),
}

impl EntityRef {
    /// Kind discriminant of the referenced entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Participant(_) => EntityKind::Participant,
            EntityRef::ProxyParticipant(_) => EntityKind::ProxyParticipant,
            EntityRef::Writer(_) => EntityKind::Writer,
            EntityRef::Reader(_) => EntityKind::Reader,
            EntityRef::ProxyWriter(_) => EntityKind::ProxyWriter,
            EntityRef::ProxyReader(_) => EntityKind::ProxyReader,
        }
    }

    /// GUID of the referenced entity.
    #[must_use]
    pub fn guid(&self) -> Guid {
        match self {
            EntityRef::Participant(e) => e.guid,
            EntityRef::ProxyParticipant(e) => e.guid,
            EntityRef::Writer(e) => e.guid,
            EntityRef::Reader(e) => e.guid,
            EntityRef::ProxyWriter(e) => e.guid,
            EntityRef::ProxyReader(e) => e.guid,
        }
    }
}

/// The domain-wide entity hash.
#[derive(Default)]
pub struct EntityIndex {
    map: DashMap<Guid, EntityRef>,
}

impl EntityIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity; a GUID collision is an internal error.
    pub fn insert(&self, entity: EntityRef) -> Result<()> {
        let guid = entity.guid();
        if self.map.insert(guid, entity).is_some() {
            log::error!("[ephash] duplicate GUID inserted: {guid}");
            return Err(Error::Generic(format!("duplicate GUID {guid}")));
        }
        Ok(())
    }

    /// Remove an entity, returning it if present.
    pub fn remove(&self, guid: &Guid) -> Option<EntityRef> {
        self.map.remove(guid).map(|(_, e)| e)
    }

    /// Untyped lookup.
    #[must_use]
    pub fn lookup(&self, guid: &Guid) -> Option<EntityRef> {
        self.map.get(guid).map(|e| e.value().clone())
    }

    /// Typed lookup: local participant.
    #[must_use]
    pub fn lookup_participant(&self, guid: &Guid) -> Option<Arc<Participant>> {
        match self.lookup(guid) {
            Some(EntityRef::Participant(p)) => Some(p),
            _ => None,
        }
    }

    /// Typed lookup: proxy participant.
    #[must_use]
    pub fn lookup_proxy_participant(&self, guid: &Guid) -> Option<Arc<ProxyParticipant>> {
        match self.lookup(guid) {
            Some(EntityRef::ProxyParticipant(p)) => Some(p),
            _ => None,
        }
    }

    /// Typed lookup: local writer.
    #[must_use]
    pub fn lookup_writer(&self, guid: &Guid) -> Option<Arc<LocalWriter>> {
        match self.lookup(guid) {
            Some(EntityRef::Writer(w)) => Some(w),
            _ => None,
        }
    }

    /// Typed lookup: local reader.
    #[must_use]
    pub fn lookup_reader(&self, guid: &Guid) -> Option<Arc<LocalReader>> {
        match self.lookup(guid) {
            Some(EntityRef::Reader(r)) => Some(r),
            _ => None,
        }
    }

    /// Typed lookup: proxy writer.
    #[must_use]
    pub fn lookup_proxy_writer(&self, guid: &Guid) -> Option<Arc<ProxyWriter>> {
        match self.lookup(guid) {
            Some(EntityRef::ProxyWriter(w)) => Some(w),
            _ => None,
        }
    }

    /// Typed lookup: proxy reader.
    #[must_use]
    pub fn lookup_proxy_reader(&self, guid: &Guid) -> Option<Arc<ProxyReader>> {
        match self.lookup(guid) {
            Some(EntityRef::ProxyReader(r)) => Some(r),
            _ => None,
        }
    }

    /// Snapshot of all local participants.
    #[must_use]
    pub fn participants(&self) -> Vec<Arc<Participant>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::Participant(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of all proxy participants.
    #[must_use]
    pub fn proxy_participants(&self) -> Vec<Arc<ProxyParticipant>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::ProxyParticipant(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of all local writers.
    #[must_use]
    pub fn writers(&self) -> Vec<Arc<LocalWriter>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::Writer(w) => Some(w.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of all local readers.
    #[must_use]
    pub fn readers(&self) -> Vec<Arc<LocalReader>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::Reader(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of all proxy writers.
    #[must_use]
    pub fn proxy_writers(&self) -> Vec<Arc<ProxyWriter>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::ProxyWriter(w) => Some(w.clone()),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of all proxy readers.
    #[must_use]
    pub fn proxy_readers(&self) -> Vec<Arc<ProxyReader>> {
        self.map
            .iter()
            .filter_map(|e| match e.value() {
                EntityRef::ProxyReader(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of hashed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True iff no entity is hashed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
