// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios driven through the domain glue: discovery feeds,
//! in-order delivery, reliability, and liveliness interacting across the
//! subsystems the way the receive path drives them.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::core::guid::{Guid, GuidPrefix, ENTITYID_PARTICIPANT};
use crate::core::serdata::{SerializedSample, WriteState};
use crate::core::time::{Dur, Mtime, Wtime};
use crate::discovery::{MatchEvent, SedpEndpointData, SpdpParticipantData};
use crate::domain::Domain;
use crate::entity::Topic;
use crate::qos::{History, Qos, UserData};
use crate::rhc::StateMasks;
use crate::transport::tcp::TcpTransport;
use crate::transport::{Connection, Locator, LocatorKind, Transport};

fn remote_participant(n: u8, lease: Dur) -> SpdpParticipantData {
    SpdpParticipantData {
        guid: Guid::new(GuidPrefix([n; 12]), ENTITYID_PARTICIPANT),
        lease_duration: lease,
        locators: Vec::new(),
        user_data: UserData::default(),
        privileged_pp_guid: None,
    }
}

fn remote_writer(n: u8, topic: &str, qos: Qos) -> SedpEndpointData {
    SedpEndpointData {
        guid: Guid::new(GuidPrefix([n; 12]), [0, 0, 1, 0x02]),
        topic_name: topic.to_string(),
        type_name: "OneULong".to_string(),
        keyed: true,
        qos,
        locators: Vec::new(),
    }
}

fn remote_reader(n: u8, topic: &str, qos: Qos) -> SedpEndpointData {
    SedpEndpointData {
        guid: Guid::new(GuidPrefix([n; 12]), [0, 0, 1, 0x07]),
        topic_name: topic.to_string(),
        type_name: "OneULong".to_string(),
        keyed: true,
        qos,
        locators: Vec::new(),
    }
}

fn sample(key: u8, value: u64, timestamp: i64) -> (SerializedSample, Wtime) {
    (
        SerializedSample::new(vec![key], value.to_le_bytes().to_vec()),
        Wtime(timestamp),
    )
}

/// Reliable keep-all, no loss: 1000 samples arrive in order, none lost, no
/// duplicates.
#[test]
fn test_reliable_keep_all_no_loss() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("reader");

    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_secs(30)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);
    assert_eq!(reader.match_count(), 1);

    let pw_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);
    for seq in 1..=1000u64 {
        let (serdata, ts) = sample(0, seq, seq as i64);
        d.deliver_data(&pw_guid, seq, serdata, WriteState::Write, ts)
            .expect("deliver");
    }

    let mut received = Vec::new();
    while received.len() < 1000 {
        let batch = reader
            .rhc
            .take(128, StateMasks::ANY, None)
            .expect("take");
        if batch.is_empty() {
            break;
        }
        received.extend(batch);
    }
    assert_eq!(received.len(), 1000);
    for (i, (info, serdata)) in received.iter().enumerate() {
        let expect = i as u64 + 1;
        assert_eq!(info.sequence, expect);
        assert_eq!(info.source_timestamp, Wtime(expect as i64));
        assert_eq!(
            serdata.payload().expect("payload").as_ref(),
            &expect.to_le_bytes()
        );
    }
    d.shutdown();
}

/// Keep-last-1 with a late-joining reader: at most one sample per key, with
/// a sequence from the post-attach window.
#[test]
fn test_keep_last_one_overwrite_late_joiner() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let mut qos = Qos::reliable();
    qos.history = History::KeepLast(1);
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(qos))
        .expect("reader");

    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_secs(30)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);

    // The writer had already emitted 1..=49 before the reader attached; the
    // reader's first observed sequence is 50.
    let pw_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);
    for seq in 50..=100u64 {
        let (serdata, ts) = sample(0, seq, seq as i64);
        d.deliver_data(&pw_guid, seq, serdata, WriteState::Write, ts)
            .expect("deliver");
    }

    let got = reader.rhc.take(16, StateMasks::ANY, None).expect("take");
    assert_eq!(got.len(), 1, "keep-last-1 holds one sample per key");
    assert!((50..=100).contains(&got[0].0.sequence));
    assert_eq!(got[0].0.sequence, 100);
    d.shutdown();
}

/// Lease timeout: a silent proxy participant is deleted, its endpoints
/// unmatch, and the reader observes `current_count_change = -1`.
#[test]
fn test_lease_timeout_unmatches_endpoints() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("reader");

    let deltas = Arc::new(Mutex::new(Vec::new()));
    let deltas2 = deltas.clone();
    d.add_match_listener(Arc::new(move |ev| {
        if let MatchEvent::SubscriptionMatched {
            current_count_change,
            ..
        } = ev
        {
            deltas2.lock().push(*current_count_change);
        }
    }));

    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_millis(500)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);
    assert_eq!(reader.match_count(), 1);

    // Stop renewing: within the lease duration plus scheduling slack the
    // proxy and its endpoints must be gone.
    let deadline = std::time::Instant::now() + StdDuration::from_secs(4);
    while reader.match_count() > 0 {
        assert!(
            std::time::Instant::now() < deadline,
            "proxy writer still matched after lease expiry"
        );
        std::thread::sleep(StdDuration::from_millis(20));
    }
    let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
    loop {
        let seen = deltas.lock().clone();
        if seen == vec![1, -1] {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "expected match deltas [1, -1], saw {seen:?}"
        );
        std::thread::sleep(StdDuration::from_millis(10));
    }
    d.shutdown();
}

/// Privileged-participant rescue: the dependent proxy survives its own
/// lease expiry while the privileged one lives, and dies once it is gone.
#[test]
fn test_privileged_participant_rescue() {
    let d = Domain::new(Config::default()).expect("domain");

    // B is the privileged participant, long-lived.
    let b = remote_participant(2, Dur::from_secs(30));
    d.discovery().handle_spdp(b.clone(), 0, Mtime::now());

    // A depends on B and has a short lease.
    let mut a = remote_participant(1, Dur::from_millis(150));
    a.privileged_pp_guid = Some(b.guid);
    d.discovery().handle_spdp(a.clone(), 0, Mtime::now());

    // Past A's lease: still present thanks to the rescue re-arm.
    std::thread::sleep(StdDuration::from_millis(250));
    assert!(
        d.entities().lookup_proxy_participant(&a.guid).is_some(),
        "dependent proxy deleted despite live privileged participant"
    );

    // Remove B; A's next rescue check finds it gone and deletes A.
    d.discovery()
        .delete_proxy_participant(&b.guid)
        .expect("delete privileged");
    let deadline = std::time::Instant::now() + StdDuration::from_secs(3);
    while d.entities().lookup_proxy_participant(&a.guid).is_some() {
        assert!(
            std::time::Instant::now() < deadline,
            "dependent proxy survived the privileged participant"
        );
        std::thread::sleep(StdDuration::from_millis(20));
    }
    d.shutdown();
}

/// NACK-driven retransmit end to end: the reader-side gate parks the window
/// above the loss, its ACKNACK content names exactly the missing sequence,
/// the writer retransmits it once, and delivery resumes in order.
#[test]
fn test_nack_driven_retransmit() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("reader");
    let writer = d
        .new_writer(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("writer");

    // Remote side: a proxy writer feeding our reader and a proxy reader
    // matched to our writer.
    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_secs(30)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);
    d.discovery()
        .handle_sedp_subscription(remote_reader(1, "OU", Qos::reliable()), 0);
    let pw_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);
    let pr_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x07]);

    // Writer side: seq 1..=10 written and held for the reliable reader.
    for seq in 1..=10u64 {
        let (serdata, ts) = sample(0, seq, seq as i64);
        writer
            .whc
            .write(serdata, WriteState::Write, ts, crate::tkmap::InstanceHandle::NIL, Mtime(0))
            .expect("write");
        assert_eq!(writer.whc.state().max_seq, seq);
    }

    // Reader side: seq 5 is lost on the wire.
    for seq in (1..=10u64).filter(|&s| s != 5) {
        let (serdata, ts) = sample(0, seq, seq as i64);
        d.deliver_data(&pw_guid, seq, serdata, WriteState::Write, ts)
            .expect("deliver");
    }

    // The gate surfaced 1..=4 and parked 6..=10.
    let (acked, missing) = d
        .reader_ack_state(&pw_guid, &reader.guid)
        .expect("ack state");
    assert_eq!(acked, 4);
    assert_eq!(missing, Some((5, 0b1)));

    // That ACKNACK reaches the writer: one retransmit, nothing lost.
    let outcome = d
        .handle_acknack(&writer.guid, &pr_guid, 4, 5, 0b1, Mtime(1))
        .expect("acknack");
    assert_eq!(outcome.retransmit.len(), 1);
    assert_eq!(outcome.retransmit[0].seq, 5);
    assert!(outcome.lost.is_empty());
    let st = writer.whc.state();
    assert_eq!(st.counters.rexmit_count, 1);
    assert_eq!(st.counters.rexmit_lost_count, 0);

    // The retransmitted sample arrives; the reader drains 1..=10 in order.
    let (serdata, ts) = sample(0, 5, 5);
    d.deliver_data(&pw_guid, 5, serdata, WriteState::Write, ts)
        .expect("deliver retransmit");
    let got = reader.rhc.take(32, StateMasks::ANY, None).expect("take");
    let seqs: Vec<u64> = got.iter().map(|(i, _)| i.sequence).collect();
    assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());

    // Final ACK covers everything: the WHC drains.
    let (acked, missing) = d
        .reader_ack_state(&pw_guid, &reader.guid)
        .expect("ack state");
    assert_eq!(acked, 10);
    assert_eq!(missing, None);
    d.handle_acknack(&writer.guid, &pr_guid, 10, 0, 0, Mtime(2))
        .expect("final ack");
    assert!(writer.whc.is_empty());
    d.shutdown();
}

/// Dispose propagates through delivery: the reader observes the payload and
/// then the `NOT_ALIVE_DISPOSED` transition exactly once.
#[test]
fn test_dispose_through_delivery_path() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("reader");

    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_secs(30)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);
    let pw_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);

    let (serdata, ts) = sample(7, 1, 1);
    d.deliver_data(&pw_guid, 1, serdata, WriteState::Write, ts)
        .expect("deliver data");
    d.deliver_data(
        &pw_guid,
        2,
        SerializedSample::key_only(vec![7u8]),
        WriteState::Dispose,
        Wtime(2),
    )
    .expect("deliver dispose");

    let got = reader.rhc.take(16, StateMasks::ANY, None).expect("take");
    assert_eq!(got.len(), 2);
    assert!(got[0].0.valid_data);
    assert!(!got[1].0.valid_data);
    assert!(got
        .iter()
        .all(|(i, _)| i.instance_state == crate::rhc::InstanceState::NotAliveDisposed));
    // Drained while not alive: the instance record is gone.
    assert_eq!(reader.rhc.instance_count(), 0);
    d.shutdown();
}

/// A TCP write failure purges the proxy participant that was reachable only
/// over that connection: the cache reaps the client entry, the purge hook
/// hands the peer locator to discovery, and the proxy plus its endpoints
/// are torn down.
#[test]
fn test_tcp_failure_purges_proxy_participant() {
    let d = Domain::new(Config::default()).expect("domain");
    let tcp = TcpTransport::new(
        LocatorKind::Tcpv4,
        Dur::from_millis(200),
        Dur::from_millis(200),
    );
    d.wire_tcp_purge(&tcp);

    // The proxy's only locator is a TCP peer nothing listens on.
    let peer = Locator::from_socket_addr(
        LocatorKind::Tcpv4,
        &"127.0.0.1:9".parse().expect("addr"),
    );
    let mut data = remote_participant(1, Dur::from_secs(30));
    data.locators = vec![peer];
    d.discovery().handle_spdp(data.clone(), 0, Mtime::now());
    assert!(d.entities().lookup_proxy_participant(&data.guid).is_some());

    // One of its writers is matched with a local reader.
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(&pp, Topic::new("OU", "OneULong", true), Some(Qos::reliable()))
        .expect("reader");
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::reliable()), 0);
    assert_eq!(reader.match_count(), 1);

    // First write to the peer: cache-miss entry, failed connect, client
    // entry reaped, purge hook fires into discovery.
    let router = tcp.create_conn(0).expect("router");
    assert!(router.write(&peer, &[IoSlice::new(b"frame")]).is_err());
    assert_eq!(tcp.cached_connections(), 0);

    assert!(d.entities().lookup_proxy_participant(&data.guid).is_none());
    assert!(d.entities().proxy_writers().is_empty());
    assert_eq!(reader.match_count(), 0);
    d.shutdown();
}

/// Best-effort delivery permits gaps but never duplicates.
#[test]
fn test_best_effort_gaps_no_duplicates() {
    let d = Domain::new(Config::default()).expect("domain");
    let pp = d.new_participant(Qos::default()).expect("participant");
    let reader = d
        .new_reader(
            &pp,
            Topic::new("OU", "OneULong", true),
            Some(Qos {
                history: History::KeepAll,
                ..Qos::best_effort()
            }),
        )
        .expect("reader");

    d.discovery()
        .handle_spdp(remote_participant(1, Dur::from_secs(30)), 0, Mtime::now());
    d.discovery()
        .handle_sedp_publication(remote_writer(1, "OU", Qos::best_effort()), 0);
    assert_eq!(reader.match_count(), 1);

    let pw_guid = Guid::new(GuidPrefix([1; 12]), [0, 0, 1, 0x02]);
    for seq in [1u64, 2, 4, 4, 3, 5] {
        let (serdata, ts) = sample(0, seq, seq as i64);
        d.deliver_data(&pw_guid, seq, serdata, WriteState::Write, ts)
            .expect("deliver");
    }

    let got = reader.rhc.take(16, StateMasks::ANY, None).expect("take");
    let seqs: Vec<u64> = got.iter().map(|(i, _)| i.sequence).collect();
    // 3 arrived late (dropped), 4 arrived twice (deduplicated).
    assert_eq!(seqs, vec![1, 2, 4, 5]);
    d.shutdown();
}
