// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery: SPDP participant records, SEDP endpoint records, PMD
//! liveliness, and the reader/writer match engine.
//!
//! The builtin topics are ordinary readers/writers with well-known entity
//! ids; this module consumes their deserialized records. A match between a
//! local endpoint and a proxy endpoint exists iff topic and type names
//! match, the partition sets intersect, the offered QoS can serve the
//! requested QoS, and neither side excludes same-participant matching.
//! Match/unmatch outcomes are queued as [`MatchEvent`]s and drained by the
//! domain with no framework lock held, so listeners never run under a lock.

/// ParticipantMessageData codec.
pub mod pmd;

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::core::guid::Guid;
use crate::core::serdata::{STATUSINFO_DISPOSE, STATUSINFO_UNREGISTER};
use crate::core::time::{Dur, Mtime};
use crate::core::{Error, Result};
use crate::entity::{
    EntityIndex, EntityKind, EntityRef, LocalReader, LocalWriter, Participant, ProxyParticipant,
    ProxyReader, ProxyWriter,
};
use crate::liveliness::LeaseManager;
use crate::qos::{Qos, QosPolicyId, Reliability, UserData};
use crate::transport::Locator;

use pmd::ParticipantMessageData;

/// Deserialized SPDP participant announcement.
#[derive(Debug, Clone)]
pub struct SpdpParticipantData {
    pub guid: Guid,
    pub lease_duration: Dur,
    pub locators: Vec<Locator>,
    pub user_data: UserData,
    /// Set when another participant writes discovery data on this one's
    /// behalf.
    pub privileged_pp_guid: Option<Guid>,
}

/// Deserialized SEDP endpoint announcement (publication or subscription).
#[derive(Debug, Clone)]
pub struct SedpEndpointData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub keyed: bool,
    pub qos: Qos,
    pub locators: Vec<Locator>,
}

/// Match-state delta delivered to application listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    /// A local writer gained/lost a matched remote reader.
    PublicationMatched {
        writer: Guid,
        reader: Guid,
        current_count_change: i32,
    },
    /// A local reader gained/lost a matched remote writer.
    SubscriptionMatched {
        reader: Guid,
        writer: Guid,
        current_count_change: i32,
    },
}

/// Why a candidate pair did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFailure {
    TopicName,
    TypeName,
    IgnoreLocal,
    Qos(QosPolicyId),
}

/// The discovery subsystem.
pub struct Discovery {
    index: Arc<EntityIndex>,
    leases: Arc<LeaseManager>,
    events: Sender<MatchEvent>,
}

impl Discovery {
    /// Create the subsystem; the receiver side of the event queue goes to
    /// the domain's dispatch loop.
    pub fn new(
        index: Arc<EntityIndex>,
        leases: Arc<LeaseManager>,
    ) -> (Self, Receiver<MatchEvent>) {
        let (tx, rx) = unbounded();
        (
            Self {
                index,
                leases,
                events: tx,
            },
            rx,
        )
    }

    // ========================================================================
    // SPDP
    // ========================================================================

    /// Build the announcement for a local participant.
    #[must_use]
    pub fn spdp_data_for(participant: &Participant, lease_duration: Dur) -> SpdpParticipantData {
        SpdpParticipantData {
            guid: participant.guid,
            lease_duration,
            locators: participant.addrset.to_vec(),
            user_data: participant.default_qos.user_data.clone(),
            privileged_pp_guid: None,
        }
    }

    /// Process a received SPDP sample.
    pub fn handle_spdp(&self, data: SpdpParticipantData, statusinfo: u32, now: Mtime) {
        if statusinfo & (STATUSINFO_DISPOSE | STATUSINFO_UNREGISTER) != 0 {
            if let Err(e) = self.delete_proxy_participant(&data.guid) {
                log::debug!("[discovery] spdp dispose for unknown {}: {e}", data.guid);
            }
            return;
        }

        if let Some(existing) = self.index.lookup_proxy_participant(&data.guid) {
            existing.addrset.replace(data.locators);
            if let Some(lease) = existing.lease() {
                self.leases.renew(&lease, now);
            }
            return;
        }

        log::info!("[discovery] new participant {}", data.guid);
        let mut qos = Qos::default();
        qos.user_data = data.user_data;
        let proxy = Arc::new(ProxyParticipant::new(
            data.guid,
            data.privileged_pp_guid,
            qos,
        ));
        proxy.addrset.replace(data.locators);
        let lease = self.leases.create(
            data.guid,
            EntityKind::ProxyParticipant,
            now.add_dur(data.lease_duration),
            data.lease_duration,
        );
        proxy.set_lease(lease.clone());
        if self
            .index
            .insert(EntityRef::ProxyParticipant(proxy))
            .is_ok()
        {
            self.leases.register(&lease);
        }
    }

    /// Delete a proxy participant and everything hanging off it.
    pub fn delete_proxy_participant(&self, guid: &Guid) -> Result<()> {
        let Some(proxy) = self.index.lookup_proxy_participant(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !proxy.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        log::info!("[discovery] deleting participant {guid}");
        self.index.remove(guid);
        if let Some(lease) = proxy.lease() {
            self.leases.free(&lease);
        }
        for endpoint in proxy.endpoints() {
            if endpoint.is_writer() {
                let _ = self.delete_proxy_writer(&endpoint);
            } else if endpoint.is_reader() {
                let _ = self.delete_proxy_reader(&endpoint);
            }
        }
        Ok(())
    }

    /// Purge every proxy participant reachable only through `peer` (invoked
    /// by the TCP connection cache when a connection dies).
    pub fn purge_proxy_participants(&self, peer: &Locator) {
        for proxy in self.index.proxy_participants() {
            if proxy.addrset.to_vec() == vec![*peer] {
                log::info!(
                    "[discovery] purging {} (sole locator {peer} lost)",
                    proxy.guid
                );
                let _ = self.delete_proxy_participant(&proxy.guid);
            }
        }
    }

    // ========================================================================
    // PMD
    // ========================================================================

    /// Process a received ParticipantMessageData payload.
    pub fn handle_pmd(&self, payload: &[u8], statusinfo: u32, now: Mtime) -> Result<()> {
        match statusinfo & (STATUSINFO_DISPOSE | STATUSINFO_UNREGISTER) {
            0 => {
                let data = ParticipantMessageData::decode(payload)?;
                let guid = Guid::new(data.guid_prefix, crate::core::guid::ENTITYID_PARTICIPANT);
                match self.index.lookup_proxy_participant(&guid) {
                    Some(proxy) => {
                        if let Some(lease) = proxy.lease() {
                            self.leases.renew(&lease, now);
                        }
                        Ok(())
                    }
                    None => {
                        log::trace!("[discovery] PMD for unknown participant {guid}");
                        Err(Error::PreconditionNotMet)
                    }
                }
            }
            _ => {
                let prefix = ParticipantMessageData::decode_key(payload)?;
                let guid = Guid::new(prefix, crate::core::guid::ENTITYID_PARTICIPANT);
                self.delete_proxy_participant(&guid)
            }
        }
    }

    // ========================================================================
    // SEDP
    // ========================================================================

    /// Process a received SEDP publication (remote writer) record.
    pub fn handle_sedp_publication(&self, data: SedpEndpointData, statusinfo: u32) {
        if statusinfo & (STATUSINFO_DISPOSE | STATUSINFO_UNREGISTER) != 0 {
            let _ = self.delete_proxy_writer(&data.guid);
            return;
        }
        if self.index.lookup_proxy_writer(&data.guid).is_some() {
            return; // refresh only carries QoS changes, which we snapshot at create
        }
        let pp_guid = data.guid.participant();
        let Some(pp) = self.index.lookup_proxy_participant(&pp_guid) else {
            log::debug!(
                "[discovery] sedp publication {} without participant, dropped",
                data.guid
            );
            return;
        };

        let proxy = Arc::new(ProxyWriter::new(
            data.guid,
            pp_guid,
            data.topic_name.into(),
            data.type_name.into(),
            data.keyed,
            data.qos,
        ));
        let locators = if data.locators.is_empty() {
            pp.addrset.to_vec()
        } else {
            data.locators
        };
        proxy.addrset.replace(locators);
        if self.index.insert(EntityRef::ProxyWriter(proxy.clone())).is_err() {
            return;
        }
        pp.add_endpoint(data.guid);
        log::debug!(
            "[discovery] new proxy writer {} topic {}",
            proxy.guid,
            proxy.topic_name
        );
        self.match_proxy_writer(&proxy);
    }

    /// Process a received SEDP subscription (remote reader) record.
    pub fn handle_sedp_subscription(&self, data: SedpEndpointData, statusinfo: u32) {
        if statusinfo & (STATUSINFO_DISPOSE | STATUSINFO_UNREGISTER) != 0 {
            let _ = self.delete_proxy_reader(&data.guid);
            return;
        }
        if self.index.lookup_proxy_reader(&data.guid).is_some() {
            return;
        }
        let pp_guid = data.guid.participant();
        let Some(pp) = self.index.lookup_proxy_participant(&pp_guid) else {
            log::debug!(
                "[discovery] sedp subscription {} without participant, dropped",
                data.guid
            );
            return;
        };

        let proxy = Arc::new(ProxyReader::new(
            data.guid,
            pp_guid,
            data.topic_name.into(),
            data.type_name.into(),
            data.keyed,
            data.qos,
        ));
        let locators = if data.locators.is_empty() {
            pp.addrset.to_vec()
        } else {
            data.locators
        };
        proxy.addrset.replace(locators);
        if self.index.insert(EntityRef::ProxyReader(proxy.clone())).is_err() {
            return;
        }
        pp.add_endpoint(data.guid);
        log::debug!(
            "[discovery] new proxy reader {} topic {}",
            proxy.guid,
            proxy.topic_name
        );
        self.match_proxy_reader(&proxy);
    }

    /// Delete a proxy writer, unmatching every local reader.
    pub fn delete_proxy_writer(&self, guid: &Guid) -> Result<()> {
        let Some(proxy) = self.index.lookup_proxy_writer(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !proxy.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        self.index.remove(guid);
        if let Some(pp) = self.index.lookup_proxy_participant(&proxy.participant) {
            pp.remove_endpoint(guid);
        }
        for reader_guid in proxy.matched_readers() {
            if let Some(reader) = self.index.lookup_reader(&reader_guid) {
                if reader.remove_match(guid) {
                    self.push_event(MatchEvent::SubscriptionMatched {
                        reader: reader_guid,
                        writer: *guid,
                        current_count_change: -1,
                    });
                }
            }
        }
        Ok(())
    }

    /// Delete a proxy reader, unmatching every local writer.
    pub fn delete_proxy_reader(&self, guid: &Guid) -> Result<()> {
        let Some(proxy) = self.index.lookup_proxy_reader(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !proxy.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        self.index.remove(guid);
        if let Some(pp) = self.index.lookup_proxy_participant(&proxy.participant) {
            pp.remove_endpoint(guid);
        }
        for writer_guid in proxy.matched_writers() {
            if let Some(writer) = self.index.lookup_writer(&writer_guid) {
                if writer.remove_match(guid) {
                    self.push_event(MatchEvent::PublicationMatched {
                        writer: writer_guid,
                        reader: *guid,
                        current_count_change: -1,
                    });
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Run the match test for a newly created local writer against all known
    /// proxy readers.
    pub fn match_local_writer(&self, writer: &Arc<LocalWriter>) {
        for proxy in self.index.proxy_readers() {
            self.try_match_writer_reader(writer, &proxy);
        }
    }

    /// Run the match test for a newly created local reader against all known
    /// proxy writers.
    pub fn match_local_reader(&self, reader: &Arc<LocalReader>) {
        for proxy in self.index.proxy_writers() {
            self.try_match_reader_writer(reader, &proxy);
        }
    }

    fn match_proxy_writer(&self, proxy: &Arc<ProxyWriter>) {
        for reader in self.index.readers() {
            self.try_match_reader_writer(&reader, proxy);
        }
    }

    fn match_proxy_reader(&self, proxy: &Arc<ProxyReader>) {
        for writer in self.index.writers() {
            self.try_match_writer_reader(&writer, proxy);
        }
    }

    fn try_match_writer_reader(&self, writer: &Arc<LocalWriter>, proxy: &Arc<ProxyReader>) {
        let verdict = endpoints_match(
            &writer.topic.name,
            &writer.topic.type_name,
            &writer.qos,
            &writer.guid,
            &proxy.topic_name,
            &proxy.type_name,
            &proxy.qos,
            &proxy.guid,
        );
        match verdict {
            Ok(()) => {
                let reliable = proxy.qos.reliability == Reliability::Reliable;
                if writer.add_match(proxy.guid, reliable) {
                    proxy.add_match(writer.guid);
                    log::debug!(
                        "[discovery] matched writer {} with reader {}",
                        writer.guid,
                        proxy.guid
                    );
                    self.push_event(MatchEvent::PublicationMatched {
                        writer: writer.guid,
                        reader: proxy.guid,
                        current_count_change: 1,
                    });
                }
            }
            Err(MatchFailure::Qos(policy)) => {
                log::debug!(
                    "[discovery] writer {} / reader {}: incompatible {policy:?}",
                    writer.guid,
                    proxy.guid
                );
            }
            Err(_) => {}
        }
    }

    fn try_match_reader_writer(&self, reader: &Arc<LocalReader>, proxy: &Arc<ProxyWriter>) {
        let verdict = endpoints_match(
            &proxy.topic_name,
            &proxy.type_name,
            &proxy.qos,
            &proxy.guid,
            &reader.topic.name,
            &reader.topic.type_name,
            &reader.qos,
            &reader.guid,
        );
        match verdict {
            Ok(()) => {
                let reliable = reader.qos.reliability == Reliability::Reliable;
                if reader.add_match(proxy.guid, reliable) {
                    proxy.add_match(reader.guid, reliable);
                    log::debug!(
                        "[discovery] matched reader {} with writer {}",
                        reader.guid,
                        proxy.guid
                    );
                    self.push_event(MatchEvent::SubscriptionMatched {
                        reader: reader.guid,
                        writer: proxy.guid,
                        current_count_change: 1,
                    });
                }
            }
            Err(MatchFailure::Qos(policy)) => {
                log::debug!(
                    "[discovery] reader {} / writer {}: incompatible {policy:?}",
                    reader.guid,
                    proxy.guid
                );
            }
            Err(_) => {}
        }
    }

    /// Number of remote participants with at least one discovered endpoint,
    /// all of whose discovered endpoints are matched.
    #[must_use]
    pub fn matched_participant_count(&self) -> usize {
        self.index
            .proxy_participants()
            .iter()
            .filter(|pp| {
                let mut relevant = 0;
                let mut matched = 0;
                for endpoint in pp.endpoints() {
                    if let Some(pw) = self.index.lookup_proxy_writer(&endpoint) {
                        relevant += 1;
                        if !pw.matched_readers().is_empty() {
                            matched += 1;
                        }
                    } else if let Some(pr) = self.index.lookup_proxy_reader(&endpoint) {
                        relevant += 1;
                        if !pr.matched_writers().is_empty() {
                            matched += 1;
                        }
                    }
                }
                relevant > 0 && relevant == matched
            })
            .count()
    }

    fn push_event(&self, event: MatchEvent) {
        if self.events.send(event).is_err() {
            log::warn!("[discovery] match event queue closed");
        }
    }
}

/// The match predicate: topic name, type name, ignore-local, then the QoS
/// request/offer rules (which include partition intersection).
#[allow(clippy::too_many_arguments)]
fn endpoints_match(
    w_topic: &str,
    w_type: &str,
    w_qos: &Qos,
    w_guid: &Guid,
    r_topic: &str,
    r_type: &str,
    r_qos: &Qos,
    r_guid: &Guid,
) -> std::result::Result<(), MatchFailure> {
    if w_topic != r_topic {
        return Err(MatchFailure::TopicName);
    }
    if w_type != r_type {
        return Err(MatchFailure::TypeName);
    }
    if (w_qos.ignore_local || r_qos.ignore_local) && w_guid.prefix == r_guid.prefix {
        return Err(MatchFailure::IgnoreLocal);
    }
    Qos::compatible(w_qos, r_qos).map_err(MatchFailure::Qos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{
        GuidPrefix, ENTITYID_PARTICIPANT, ENTITYID_SEDP_PUBLICATIONS_WRITER,
    };
    use crate::entity::Topic;
    use crate::tkmap::TkMap;

    struct Fixture {
        index: Arc<EntityIndex>,
        leases: Arc<LeaseManager>,
        discovery: Discovery,
        events: Receiver<MatchEvent>,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(EntityIndex::new());
        let leases = Arc::new(LeaseManager::new(Box::new(|| {})));
        let (discovery, events) = Discovery::new(index.clone(), leases.clone());
        Fixture {
            index,
            leases,
            discovery,
            events,
        }
    }

    fn remote_prefix(n: u8) -> GuidPrefix {
        GuidPrefix([n; 12])
    }

    fn spdp(n: u8) -> SpdpParticipantData {
        SpdpParticipantData {
            guid: Guid::new(remote_prefix(n), ENTITYID_PARTICIPANT),
            lease_duration: Dur::from_millis(500),
            locators: Vec::new(),
            user_data: UserData::default(),
            privileged_pp_guid: None,
        }
    }

    fn sedp_writer(n: u8, topic: &str, qos: Qos) -> SedpEndpointData {
        SedpEndpointData {
            guid: Guid::new(remote_prefix(n), [0, 0, 1, 0x02]),
            topic_name: topic.to_string(),
            type_name: "T".to_string(),
            keyed: false,
            qos,
            locators: Vec::new(),
        }
    }

    fn sedp_reader(n: u8, topic: &str, qos: Qos) -> SedpEndpointData {
        SedpEndpointData {
            guid: Guid::new(remote_prefix(n), [0, 0, 1, 0x07]),
            topic_name: topic.to_string(),
            type_name: "T".to_string(),
            keyed: false,
            qos,
            locators: Vec::new(),
        }
    }

    fn local_reader(f: &Fixture, topic: &str, qos: Qos) -> Arc<LocalReader> {
        let reader = Arc::new(LocalReader::new(
            Guid::new(GuidPrefix([0xAA; 12]), [0, 0, 2, 0x07]),
            Topic::new(topic, "T", false),
            qos,
            Arc::new(TkMap::new()),
        ));
        f.index
            .insert(EntityRef::Reader(reader.clone()))
            .expect("insert reader");
        reader
    }

    fn local_writer(f: &Fixture, topic: &str, qos: Qos) -> Arc<LocalWriter> {
        let writer = Arc::new(LocalWriter::new(
            Guid::new(GuidPrefix([0xAA; 12]), [0, 0, 2, 0x02]),
            Topic::new(topic, "T", false),
            qos,
            1024,
            1 << 20,
        ));
        f.index
            .insert(EntityRef::Writer(writer.clone()))
            .expect("insert writer");
        writer
    }

    #[test]
    fn test_spdp_creates_proxy_and_lease() {
        let f = fixture();
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        let guid = Guid::new(remote_prefix(1), ENTITYID_PARTICIPANT);
        assert!(f.index.lookup_proxy_participant(&guid).is_some());
        assert_eq!(f.leases.scheduled(), 1);
    }

    #[test]
    fn test_spdp_renews_existing() {
        let f = fixture();
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        let guid = Guid::new(remote_prefix(1), ENTITYID_PARTICIPANT);
        let proxy = f.index.lookup_proxy_participant(&guid).expect("proxy");
        let before = proxy.lease().expect("lease").deadline();

        f.discovery
            .handle_spdp(spdp(1), 0, Mtime(Dur::from_millis(100).0));
        let after = proxy.lease().expect("lease").deadline();
        assert!(after > before);
        // Still one proxy, one lease.
        assert_eq!(f.index.proxy_participants().len(), 1);
        assert_eq!(f.leases.scheduled(), 1);
    }

    #[test]
    fn test_sedp_matches_compatible_reader() {
        let f = fixture();
        let reader = local_reader(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        f.discovery
            .handle_sedp_publication(sedp_writer(1, "topic", Qos::reliable()), 0);

        assert_eq!(reader.match_count(), 1);
        let event = f.events.try_recv().expect("event");
        assert_eq!(
            event,
            MatchEvent::SubscriptionMatched {
                reader: reader.guid,
                writer: Guid::new(remote_prefix(1), [0, 0, 1, 0x02]),
                current_count_change: 1,
            }
        );
    }

    #[test]
    fn test_sedp_requires_known_participant() {
        let f = fixture();
        local_reader(&f, "topic", Qos::reliable());
        // No SPDP first: the endpoint record is dropped.
        f.discovery
            .handle_sedp_publication(sedp_writer(1, "topic", Qos::reliable()), 0);
        assert!(f.index.proxy_writers().is_empty());
    }

    #[test]
    fn test_qos_mismatch_prevents_match() {
        let f = fixture();
        let reader = local_reader(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        f.discovery
            .handle_sedp_publication(sedp_writer(1, "topic", Qos::best_effort()), 0);
        assert_eq!(reader.match_count(), 0);
        assert!(f.events.try_recv().is_err());
    }

    #[test]
    fn test_topic_mismatch_prevents_match() {
        let f = fixture();
        let reader = local_reader(&f, "topic_a", Qos::default());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        f.discovery
            .handle_sedp_publication(sedp_writer(1, "topic_b", Qos::default()), 0);
        assert_eq!(reader.match_count(), 0);
    }

    #[test]
    fn test_writer_side_matching() {
        let f = fixture();
        let writer = local_writer(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        f.discovery
            .handle_sedp_subscription(sedp_reader(1, "topic", Qos::reliable()), 0);

        assert_eq!(writer.match_count(), 1);
        assert!(matches!(
            f.events.try_recv(),
            Ok(MatchEvent::PublicationMatched {
                current_count_change: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_dispose_unmatches_with_negative_delta() {
        let f = fixture();
        let writer = local_writer(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        let sub = sedp_reader(1, "topic", Qos::reliable());
        f.discovery.handle_sedp_subscription(sub.clone(), 0);
        let _ = f.events.try_recv();

        f.discovery
            .handle_sedp_subscription(sub, STATUSINFO_DISPOSE);
        assert_eq!(writer.match_count(), 0);
        assert!(matches!(
            f.events.try_recv(),
            Ok(MatchEvent::PublicationMatched {
                current_count_change: -1,
                ..
            })
        ));
    }

    #[test]
    fn test_delete_proxy_participant_cascades() {
        let f = fixture();
        let writer = local_writer(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        f.discovery
            .handle_sedp_subscription(sedp_reader(1, "topic", Qos::reliable()), 0);
        assert_eq!(writer.match_count(), 1);

        let pp_guid = Guid::new(remote_prefix(1), ENTITYID_PARTICIPANT);
        f.discovery
            .delete_proxy_participant(&pp_guid)
            .expect("delete");
        assert!(f.index.lookup_proxy_participant(&pp_guid).is_none());
        assert!(f.index.proxy_readers().is_empty());
        assert_eq!(writer.match_count(), 0);
        assert_eq!(f.leases.scheduled(), 0);
    }

    #[test]
    fn test_pmd_renews_lease() {
        let f = fixture();
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        let guid = Guid::new(remote_prefix(1), ENTITYID_PARTICIPANT);
        let proxy = f.index.lookup_proxy_participant(&guid).expect("proxy");
        let before = proxy.lease().expect("lease").deadline();

        let pmd = ParticipantMessageData::automatic(remote_prefix(1));
        f.discovery
            .handle_pmd(&pmd.encode(true), 0, Mtime(Dur::from_millis(200).0))
            .expect("pmd");
        assert!(proxy.lease().expect("lease").deadline() > before);
    }

    #[test]
    fn test_pmd_dispose_deletes_proxy() {
        let f = fixture();
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        let pmd = ParticipantMessageData::automatic(remote_prefix(1));
        f.discovery
            .handle_pmd(&pmd.encode(false), STATUSINFO_DISPOSE, Mtime(1))
            .expect("pmd dispose");
        assert!(f.index.proxy_participants().is_empty());
    }

    #[test]
    fn test_pmd_unknown_participant() {
        let f = fixture();
        let pmd = ParticipantMessageData::automatic(remote_prefix(9));
        assert_eq!(
            f.discovery.handle_pmd(&pmd.encode(true), 0, Mtime(0)),
            Err(Error::PreconditionNotMet)
        );
    }

    #[test]
    fn test_ignore_local_suppresses_same_prefix() {
        let mut w_qos = Qos::default();
        w_qos.ignore_local = true;
        let same = Guid::new(GuidPrefix([7; 12]), [0, 0, 1, 0x02]);
        let same_r = Guid::new(GuidPrefix([7; 12]), [0, 0, 1, 0x07]);
        assert_eq!(
            endpoints_match(
                "t", "T", &w_qos, &same, "t", "T", &Qos::default(), &same_r
            ),
            Err(MatchFailure::IgnoreLocal)
        );
        let other_r = Guid::new(GuidPrefix([8; 12]), [0, 0, 1, 0x07]);
        assert!(endpoints_match(
            "t", "T", &w_qos, &same, "t", "T", &Qos::default(), &other_r
        )
        .is_ok());
    }

    #[test]
    fn test_matched_participant_count() {
        let f = fixture();
        local_writer(&f, "topic", Qos::reliable());
        f.discovery.handle_spdp(spdp(1), 0, Mtime(0));
        assert_eq!(f.discovery.matched_participant_count(), 0);

        f.discovery
            .handle_sedp_subscription(sedp_reader(1, "topic", Qos::reliable()), 0);
        assert_eq!(f.discovery.matched_participant_count(), 1);

        // A second remote whose reader matches nothing does not count.
        f.discovery.handle_spdp(spdp(2), 0, Mtime(0));
        f.discovery
            .handle_sedp_subscription(sedp_reader(2, "other", Qos::reliable()), 0);
        assert_eq!(f.discovery.matched_participant_count(), 1);
    }

    #[test]
    fn test_spdp_writer_entity_id_constant() {
        // The builtin SEDP publications writer id is the RTPS reserved one.
        assert_eq!(ENTITYID_SEDP_PUBLICATIONS_WRITER, [0x00, 0x00, 0x03, 0xC2]);
    }
}
