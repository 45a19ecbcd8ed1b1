// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Domain orchestration: one `Domain` value owns the global registries
//! (entity hash, instance key map, lease heap), the GC thread servicing the
//! lease heap and deferred frees, the match-event dispatch thread, the SPDP
//! announcement cadence, and the optional debug monitor.
//!
//! Entity deletion is two-phase: detach from the hash and mark closed, then
//! hand the reference to the GC thread, which waits behind the thread-state
//! barrier until no in-flight receive path can still hold it, and only then
//! drops the last reference.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::{Config, ConfigHandle};
use crate::core::guid::{Guid, GuidPrefix, ENTITYID_PARTICIPANT};
use crate::core::serdata::{SerializedSample, WriteState};
use crate::core::time::{Dur, Mtime, Wtime};
use crate::core::{Error, Result};
use crate::discovery::{Discovery, MatchEvent, SpdpParticipantData};
use crate::entity::endpoint::GatedSample;
use crate::entity::{
    EntityIndex, EntityKind, EntityRef, LocalReader, LocalWriter, Participant, Topic,
};
use crate::liveliness::{LeaseExpiryHandler, LeaseManager};
use crate::monitor::DebugMonitor;
use crate::threadmon::ThreadMonitor;
use crate::tkmap::TkMap;
use crate::transport::{default_unicast_locators, Connection, LocatorKind, ReadOutcome, Transport};
use crate::whc::NackOutcome;

/// Listener invoked for every match/unmatch event, outside all locks.
pub type MatchListener = Arc<dyn Fn(&MatchEvent) + Send + Sync>;

/// Callback carrying periodic SPDP announcements to the transmit glue.
pub type AnnounceFn = Box<dyn Fn(SpdpParticipantData) + Send + Sync>;

/// Callback handing received buffers to the RTPS decode glue.
pub type RecvDispatch = Arc<dyn Fn(&[u8], Option<crate::transport::Locator>) + Send + Sync>;

enum GcRequest {
    /// Re-evaluate the lease heap (earliest deadline may have moved).
    LeaseCheck,
    /// Deferred free of a detached entity.
    Free(EntityRef),
}

/// One DDS domain instance.
pub struct Domain {
    config: ConfigHandle,
    entities: Arc<EntityIndex>,
    tkmap: Arc<TkMap>,
    leases: Arc<LeaseManager>,
    discovery: Arc<Discovery>,
    threadmon: Arc<ThreadMonitor>,
    monitor: Mutex<Option<DebugMonitor>>,
    gc_tx: Sender<GcRequest>,
    listeners: Mutex<Vec<MatchListener>>,
    announce_fn: Mutex<Option<AnnounceFn>>,
    entity_counter: AtomicU32,
    threads: Mutex<Vec<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl Domain {
    /// Bring up a domain: registries, GC thread, event dispatch, announcer,
    /// and (when configured) the debug monitor.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        config.validate().map_err(Error::Generic)?;

        let (gc_tx, gc_rx) = unbounded();
        let wake_tx = gc_tx.clone();
        let leases = Arc::new(LeaseManager::new(Box::new(move || {
            let _ = wake_tx.send(GcRequest::LeaseCheck);
        })));
        let entities = Arc::new(EntityIndex::new());
        let tkmap = Arc::new(TkMap::new());
        let (discovery, events_rx) = Discovery::new(entities.clone(), leases.clone());
        let threadmon = ThreadMonitor::new(config.threadmon_bound);
        threadmon.start();

        let monitor = match config.monitor_port {
            Some(port) => Some(DebugMonitor::start(entities.clone(), tkmap.clone(), port)?),
            None => None,
        };

        let domain = Arc::new(Self {
            config: ConfigHandle::new(config),
            entities,
            tkmap,
            leases,
            discovery: Arc::new(discovery),
            threadmon,
            monitor: Mutex::new(monitor),
            gc_tx,
            listeners: Mutex::new(Vec::new()),
            announce_fn: Mutex::new(None),
            entity_counter: AtomicU32::new(1),
            threads: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
        });

        Self::spawn_gc_thread(&domain, gc_rx)?;
        Self::spawn_event_thread(&domain, events_rx)?;
        Self::spawn_announcer_thread(&domain)?;
        Ok(domain)
    }

    /// Live configuration handle.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.config.load()
    }

    /// The domain's entity hash.
    #[must_use]
    pub fn entities(&self) -> &Arc<EntityIndex> {
        &self.entities
    }

    /// The domain's instance key map.
    #[must_use]
    pub fn tkmap(&self) -> &Arc<TkMap> {
        &self.tkmap
    }

    /// The discovery subsystem (receive glue feeds SPDP/SEDP/PMD here).
    #[must_use]
    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    /// The lease manager (receive glue renews proxy leases on traffic).
    #[must_use]
    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    /// The debug monitor, when enabled.
    pub fn with_monitor<R>(&self, f: impl FnOnce(&DebugMonitor) -> R) -> Option<R> {
        self.monitor.lock().as_ref().map(f)
    }

    /// Register a listener for match events (dispatched outside all locks).
    pub fn add_match_listener(&self, listener: MatchListener) {
        self.listeners.lock().push(listener);
    }

    /// Install the SPDP transmit callback.
    pub fn set_announce_fn(&self, f: AnnounceFn) {
        *self.announce_fn.lock() = Some(f);
    }

    /// Wire the TCP connection cache's death notifications into discovery:
    /// proxies reachable only over a failed connection get purged.
    pub fn wire_tcp_purge(&self, tcp: &crate::transport::tcp::TcpTransport) {
        let discovery = self.discovery.clone();
        tcp.set_purge_hook(Box::new(move |peer, _server_side| {
            discovery.purge_proxy_participants(peer);
        }));
    }

    /// Append the TCP connection-cache dump to the debug monitor output.
    pub fn wire_tcp_monitor_plugin(&self, tcp: &Arc<crate::transport::tcp::TcpTransport>) {
        let tcp = tcp.clone();
        let wired = self.with_monitor(move |m| {
            m.add_plugin(Box::new(move |out| tcp.dump_cache(out)));
        });
        if wired.is_none() {
            log::debug!("[domain] monitor disabled, tcp cache dump not wired");
        }
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    /// Create a participant with the given default endpoint QoS.
    pub fn new_participant(&self, default_qos: crate::qos::Qos) -> Result<Arc<Participant>> {
        let cfg = self.config();
        let guid = Guid::new(GuidPrefix::generate(), ENTITYID_PARTICIPANT);
        let participant = Arc::new(Participant::new(guid, default_qos));
        let kind = match cfg.transport_selector {
            crate::config::TransportSelector::Udp => LocatorKind::Udpv4,
            crate::config::TransportSelector::Tcp => LocatorKind::Tcpv4,
            crate::config::TransportSelector::Tcp6 => LocatorKind::Tcpv6,
        };
        for loc in default_unicast_locators(kind, 0) {
            participant.addrset.add(loc);
        }
        // The local lease asserts our own liveliness; it never expires
        // locally, peers time us out from their side.
        let lease = self
            .leases
            .create(guid, EntityKind::Participant, Mtime::NEVER, cfg.lease_duration);
        participant.set_lease(lease.clone());
        self.entities
            .insert(EntityRef::Participant(participant.clone()))?;
        self.leases.register(&lease);
        log::info!("[domain] created participant {guid}");
        Ok(participant)
    }

    /// Delete a participant: tear down its endpoints, then the participant.
    pub fn delete_participant(&self, guid: &Guid) -> Result<()> {
        let Some(participant) = self.entities.lookup_participant(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !participant.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        for endpoint in participant.endpoints() {
            if endpoint.is_writer() {
                let _ = self.delete_writer(&endpoint);
            } else if endpoint.is_reader() {
                let _ = self.delete_reader(&endpoint);
            }
        }
        self.entities.remove(guid);
        if let Some(lease) = participant.lease() {
            self.leases.free(&lease);
        }
        log::info!("[domain] deleted participant {guid}");
        self.gc_free(EntityRef::Participant(participant));
        Ok(())
    }

    /// Create a writer under `participant`; `qos` of `None` takes the
    /// participant default. The new writer is matched against all known
    /// proxy readers.
    pub fn new_writer(
        &self,
        participant: &Arc<Participant>,
        topic: Arc<Topic>,
        qos: Option<crate::qos::Qos>,
    ) -> Result<Arc<LocalWriter>> {
        if participant.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        let qos = qos.unwrap_or_else(|| participant.default_qos.clone());
        qos.validate().map_err(|e| {
            log::warn!("[domain] invalid writer qos: {e}");
            Error::BadParameter
        })?;
        let cfg = self.config();
        let guid = Guid::new(
            participant.guid.prefix,
            self.alloc_entity_id(if topic.keyed { 0x02 } else { 0x03 }),
        );
        let writer = Arc::new(LocalWriter::new(
            guid,
            topic,
            qos,
            cfg.whc_low_water,
            cfg.whc_high_water,
        ));
        self.entities.insert(EntityRef::Writer(writer.clone()))?;
        participant.add_endpoint(guid);
        self.discovery.match_local_writer(&writer);
        log::debug!("[domain] created writer {guid}");
        Ok(writer)
    }

    /// Create a reader under `participant`, matched against all known proxy
    /// writers.
    pub fn new_reader(
        &self,
        participant: &Arc<Participant>,
        topic: Arc<Topic>,
        qos: Option<crate::qos::Qos>,
    ) -> Result<Arc<LocalReader>> {
        if participant.is_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        let qos = qos.unwrap_or_else(|| participant.default_qos.clone());
        qos.validate().map_err(|e| {
            log::warn!("[domain] invalid reader qos: {e}");
            Error::BadParameter
        })?;
        let guid = Guid::new(
            participant.guid.prefix,
            self.alloc_entity_id(if topic.keyed { 0x07 } else { 0x04 }),
        );
        let reader = Arc::new(LocalReader::new(guid, topic, qos, self.tkmap.clone()));
        self.entities.insert(EntityRef::Reader(reader.clone()))?;
        participant.add_endpoint(guid);
        self.discovery.match_local_reader(&reader);
        log::debug!("[domain] created reader {guid}");
        Ok(reader)
    }

    /// Delete a writer. With `autodispose_unregistered_instances` set, its
    /// live instances are disposed and unregistered through the WHC first so
    /// the reliability path still delivers the transitions.
    pub fn delete_writer(&self, guid: &Guid) -> Result<()> {
        let Some(writer) = self.entities.lookup_writer(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !writer.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        if writer.qos.autodispose_unregistered_instances {
            let now = Mtime::now();
            let ts = Wtime::now();
            for (handle, key) in writer.whc.live_instances() {
                let keyonly = SerializedSample::key_only(key);
                let _ = writer
                    .whc
                    .write(keyonly.clone(), WriteState::Dispose, ts, handle, now);
                let _ = writer
                    .whc
                    .write(keyonly, WriteState::Unregister, ts, handle, now);
            }
        }
        for peer in writer.matched_subscriptions() {
            if let Some(proxy) = self.entities.lookup_proxy_reader(&peer) {
                proxy.remove_match(guid);
            }
            writer.remove_match(&peer);
        }
        self.entities.remove(guid);
        if let Some(pp) = self.entities.lookup_participant(&guid.participant()) {
            pp.remove_endpoint(guid);
        }
        log::debug!("[domain] deleted writer {guid}");
        self.gc_free(EntityRef::Writer(writer));
        Ok(())
    }

    /// Delete a reader.
    ///
    /// Unmatching is asynchronous: the delivery gates are dropped here, so
    /// samples still in flight for this reader are discarded on arrival;
    /// remote writers learn about the deletion through the normal SEDP
    /// dispose / lease path rather than a synchronous handshake.
    pub fn delete_reader(&self, guid: &Guid) -> Result<()> {
        let Some(reader) = self.entities.lookup_reader(guid) else {
            return Err(Error::AlreadyDeleted);
        };
        if !reader.mark_deleted() {
            return Err(Error::AlreadyDeleted);
        }
        for peer in reader.matched_publications() {
            if let Some(proxy) = self.entities.lookup_proxy_writer(&peer) {
                proxy.remove_match(guid);
            }
            reader.remove_match(&peer);
        }
        self.entities.remove(guid);
        if let Some(pp) = self.entities.lookup_participant(&guid.participant()) {
            pp.remove_endpoint(guid);
        }
        log::debug!("[domain] deleted reader {guid}");
        self.gc_free(EntityRef::Reader(reader));
        Ok(())
    }

    // ========================================================================
    // Receive-path glue
    // ========================================================================

    /// Dispatch one received DATA sample from a proxy writer to every
    /// matched local reader, in sequence order per reader gate.
    pub fn deliver_data(
        &self,
        proxy_writer: &Guid,
        seq: u64,
        serdata: SerializedSample,
        state: WriteState,
        timestamp: Wtime,
    ) -> Result<()> {
        let Some(pw) = self.entities.lookup_proxy_writer(proxy_writer) else {
            return Err(Error::PreconditionNotMet);
        };
        for reader_guid in pw.matched_readers() {
            let ready = pw.with_match(&reader_guid, |m| {
                m.gate.accept(
                    seq,
                    GatedSample {
                        serdata: serdata.clone(),
                        state,
                        timestamp,
                    },
                )
            });
            let Some(ready) = ready else { continue };
            let Some(reader) = self.entities.lookup_reader(&reader_guid) else {
                continue; // reader deleted: discard, writer finds out later
            };
            for (ready_seq, sample) in ready {
                let _ = reader.rhc.store(
                    *proxy_writer,
                    ready_seq,
                    sample.serdata,
                    sample.state,
                    sample.timestamp,
                );
            }
        }
        Ok(())
    }

    /// Dispatch a GAP announcement from a proxy writer.
    pub fn deliver_gap(&self, proxy_writer: &Guid, start: u64, end: u64) -> Result<()> {
        let Some(pw) = self.entities.lookup_proxy_writer(proxy_writer) else {
            return Err(Error::PreconditionNotMet);
        };
        for reader_guid in pw.matched_readers() {
            let ready = pw.with_match(&reader_guid, |m| m.gate.handle_gap(start, end));
            let Some(ready) = ready else { continue };
            let Some(reader) = self.entities.lookup_reader(&reader_guid) else {
                continue;
            };
            for (ready_seq, sample) in ready {
                let _ = reader.rhc.store(
                    *proxy_writer,
                    ready_seq,
                    sample.serdata,
                    sample.state,
                    sample.timestamp,
                );
            }
        }
        Ok(())
    }

    /// Process an ACKNACK aimed at a local writer: the ack part advances the
    /// reader's state, the nack part yields the retransmission work list.
    pub fn handle_acknack(
        &self,
        writer: &Guid,
        reader: &Guid,
        acked_through: u64,
        nack_base: u64,
        nack_bitmap: u32,
        now: Mtime,
    ) -> Result<NackOutcome> {
        let Some(w) = self.entities.lookup_writer(writer) else {
            return Err(Error::PreconditionNotMet);
        };
        w.whc.ack(reader, acked_through, now);
        if nack_bitmap != 0 {
            Ok(w.whc.nack(reader, nack_base, nack_bitmap, now))
        } else {
            Ok(NackOutcome::default())
        }
    }

    /// ACKNACK content a local reader should send to a proxy writer:
    /// `(acked_through, missing)` from the in-order gate.
    pub fn reader_ack_state(
        &self,
        proxy_writer: &Guid,
        reader: &Guid,
    ) -> Option<(u64, Option<(u64, u32)>)> {
        let pw = self.entities.lookup_proxy_writer(proxy_writer)?;
        pw.with_match(reader, |m| (m.gate.acked_through(), m.gate.missing()))
    }

    // ========================================================================
    // Receive threads
    // ========================================================================

    /// Start the receive threads over `ports` of `transport`, handing every
    /// received buffer to `dispatch` (the RTPS decode glue).
    ///
    /// `RecvMode::Single` runs one thread per channel; `RecvMode::Many`
    /// spreads the channels over `n_recv_threads` threads. Each read and
    /// dispatch is bracketed by the thread-liveness observation points.
    /// The transport's read timeout bounds shutdown latency.
    pub fn start_receive(
        &self,
        transport: &Arc<dyn Transport>,
        ports: &[u16],
        dispatch: RecvDispatch,
    ) -> Result<()> {
        let cfg = self.config();
        let channels = ports
            .iter()
            .map(|&port| transport.create_conn(port))
            .collect::<Result<Vec<_>>>()?;

        let groups: Vec<Vec<Arc<dyn Connection>>> = match cfg.recv_mode {
            crate::config::RecvMode::Single => {
                channels.into_iter().map(|c| vec![c]).collect()
            }
            crate::config::RecvMode::Many => {
                let n = cfg.n_recv_threads.max(1);
                let mut groups: Vec<Vec<Arc<dyn Connection>>> = vec![Vec::new(); n];
                for (i, channel) in channels.into_iter().enumerate() {
                    groups[i % n].push(channel);
                }
                groups.into_iter().filter(|g| !g.is_empty()).collect()
            }
        };

        for (i, group) in groups.into_iter().enumerate() {
            let stop = self.stop.clone();
            let dispatch = dispatch.clone();
            let state = self.threadmon.register(&format!("recv.{i}"));
            let handle = std::thread::Builder::new()
                .name(format!("recv.{i}"))
                .spawn(move || {
                    let mut buf = vec![0u8; 65536];
                    while !stop.load(Ordering::Acquire) {
                        for channel in &group {
                            if stop.load(Ordering::Acquire) {
                                break;
                            }
                            state.awake();
                            match channel.read(&mut buf, true) {
                                Ok(ReadOutcome::Data { len, src }) => {
                                    dispatch(&buf[..len], src);
                                }
                                Ok(ReadOutcome::Spurious) => {}
                                Ok(ReadOutcome::Eof) => {
                                    state.asleep();
                                    log::debug!("[recv.{i}] channel eof");
                                    return;
                                }
                                Err(e) => {
                                    log::warn!("[recv.{i}] read failed: {e}");
                                }
                            }
                            state.asleep();
                        }
                    }
                })?;
            self.threads.lock().push(handle);
        }
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop all domain threads. Idempotent.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[domain] shutting down");
        let _ = self.gc_tx.send(GcRequest::LeaseCheck);
        let threads = std::mem::take(&mut *self.threads.lock());
        let current = std::thread::current().id();
        for handle in threads {
            // A domain thread may hold the last reference and run this drop
            // itself; it must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        self.threadmon.stop();
    }

    fn alloc_entity_id(&self, kind: u8) -> [u8; 4] {
        let n = self.entity_counter.fetch_add(1, Ordering::Relaxed);
        let b = n.to_be_bytes();
        [b[1], b[2], b[3], kind]
    }

    fn gc_free(&self, entity: EntityRef) {
        if self.gc_tx.send(GcRequest::Free(entity)).is_err() {
            log::warn!("[domain] gc queue closed, freeing inline");
        }
    }

    fn spawn_gc_thread(domain: &Arc<Self>, gc_rx: Receiver<GcRequest>) -> Result<()> {
        let weak = Arc::downgrade(domain);
        let stop = domain.stop.clone();
        let state = domain.threadmon.register("gc");
        let handle = std::thread::Builder::new()
            .name("gc".to_string())
            .spawn(move || {
                let mut delay = Dur::from_millis(100);
                loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let timeout = delay.to_std().min(StdDuration::from_millis(500));
                    let request = gc_rx.recv_timeout(timeout);
                    let Some(domain) = weak.upgrade() else { break };
                    match request {
                        Ok(GcRequest::Free(entity)) => {
                            // No new lookup can find the entity (it left the
                            // hash); the barrier flushes in-flight holders.
                            domain.threadmon.statechange_barrier();
                            log::trace!("[gc] freed {}", entity.guid());
                            drop(entity);
                        }
                        Ok(GcRequest::LeaseCheck) | Err(RecvTimeoutError::Timeout) => {
                            state.awake();
                            let handler = DomainExpiryHandler { domain: &domain };
                            delay = domain.leases.expire_due(Mtime::now(), &handler);
                            state.asleep();
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        domain.threads.lock().push(handle);
        Ok(())
    }

    fn spawn_event_thread(domain: &Arc<Self>, events_rx: Receiver<MatchEvent>) -> Result<()> {
        let weak = Arc::downgrade(domain);
        let stop = domain.stop.clone();
        let handle = std::thread::Builder::new()
            .name("events".to_string())
            .spawn(move || loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match events_rx.recv_timeout(StdDuration::from_millis(200)) {
                    Ok(event) => {
                        let Some(domain) = weak.upgrade() else { break };
                        // Snapshot under the lock, dispatch with it released:
                        // listeners run application code.
                        let listeners = domain.listeners.lock().clone();
                        drop(domain);
                        for listener in listeners {
                            listener(&event);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        domain.threads.lock().push(handle);
        Ok(())
    }

    fn spawn_announcer_thread(domain: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(domain);
        let stop = domain.stop.clone();
        let handle = std::thread::Builder::new()
            .name("spdp".to_string())
            .spawn(move || {
                let mut since_last = StdDuration::ZERO;
                loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    std::thread::sleep(StdDuration::from_millis(100));
                    since_last += StdDuration::from_millis(100);
                    let Some(domain) = weak.upgrade() else { break };
                    let interval = domain.config().spdp_interval.to_std();
                    if since_last < interval {
                        continue;
                    }
                    since_last = StdDuration::ZERO;
                    let announce = domain.announce_fn.lock();
                    if let Some(f) = announce.as_ref() {
                        for pp in domain.entities.participants() {
                            f(Discovery::spdp_data_for(&pp, domain.config().lease_duration));
                        }
                    }
                }
            })?;
        domain.threads.lock().push(handle);
        Ok(())
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DomainExpiryHandler<'a> {
    domain: &'a Domain,
}

impl LeaseExpiryHandler for DomainExpiryHandler<'_> {
    fn privileged_alive(&self, proxy_pp: &Guid) -> bool {
        let Some(proxy) = self.domain.entities.lookup_proxy_participant(proxy_pp) else {
            return false;
        };
        let Some(privileged) = proxy.privileged_pp_guid else {
            return false;
        };
        self.domain
            .entities
            .lookup_proxy_participant(&privileged)
            .is_some_and(|p| !p.is_deleted())
    }

    fn on_lease_expired(&self, kind: EntityKind, guid: &Guid) {
        let result = match kind {
            EntityKind::Participant => self.domain.delete_participant(guid),
            EntityKind::ProxyParticipant => self.domain.discovery.delete_proxy_participant(guid),
            EntityKind::Writer => self.domain.delete_writer(guid),
            EntityKind::ProxyWriter => self.domain.discovery.delete_proxy_writer(guid),
            EntityKind::Reader => self.domain.delete_reader(guid),
            EntityKind::ProxyReader => self.domain.discovery.delete_proxy_reader(guid),
        };
        if let Err(e) = result {
            log::debug!("[gc] lease expiry of {guid} ({kind:?}): {e}");
        }
    }
}
