// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # FerroDDS - peer-to-peer DDS control plane and reliability engine
//!
//! A pure Rust implementation of the DDS publish/subscribe control plane
//! over an RTPS-compatible wire model: participants discover each other
//! automatically (SPDP), announce their endpoints (SEDP), match readers to
//! writers under per-endpoint QoS contracts, and exchange samples with
//! best-effort or reliable guarantees.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Domain                                  |
//! |  entity hash | instance key map | lease heap | GC | debug monitor  |
//! +--------------------------------------------------------------------+
//! |            Discovery               |        Reliability            |
//! |  SPDP / SEDP / PMD | match engine  |  WHC | heartbeat | ACK/NACK   |
//! +--------------------------------------------------------------------+
//! |        Reader history cache (instances, read/take, conditions)     |
//! +--------------------------------------------------------------------+
//! |        Transport: UDP channels | TCP connection cache | wait-set   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! The user-facing entity API (listeners, status masks, typed readers and
//! writers) and the CDR codecs for user types live outside this crate; the
//! core consumes [`core::serdata::SerializedSample`] values with a stable
//! byte identity for key and payload.

/// Global configuration: protocol constants and the runtime `Config`.
pub mod config;
/// Core primitives: time, GUIDs, the timer heap, serialized samples, errors.
pub mod core;
/// Discovery (SPDP/SEDP/PMD) and the reader/writer match engine.
pub mod discovery;
/// Domain orchestration: registries, GC, threads, debug monitor.
pub mod domain;
/// Entities and the concurrent entity hash.
pub mod entity;
/// Lease manager: timer-driven liveliness expiration.
pub mod liveliness;
/// Debug monitor: read-only text dump of live state over TCP.
pub mod monitor;
/// Quality-of-Service policies and compatibility rules.
pub mod qos;
/// Reader history cache: keyed instances, read/take, conditions.
pub mod rhc;
/// Thread liveness monitor.
pub mod threadmon;
/// Topic/instance key map.
pub mod tkmap;
/// Transport abstraction: UDP, TCP connection cache, receive wait-set.
pub mod transport;
/// Writer history cache and the writer side of reliability.
pub mod whc;

pub use config::{Config, ConfigHandle, RecvMode, TransportSelector};
pub use crate::core::guid::{EntityId, Guid, GuidPrefix};
pub use crate::core::serdata::{SerializedSample, WriteState};
pub use crate::core::time::{Dur, Mtime, Wtime, T_NEVER};
pub use crate::core::{Error, Result};
pub use discovery::{MatchEvent, SedpEndpointData, SpdpParticipantData};
pub use domain::Domain;
pub use entity::{LocalReader, LocalWriter, Participant, Topic};
pub use qos::{History, Qos, Reliability};
pub use rhc::{InstanceState, QueryCondition, ReadCondition, SampleInfo, StateMasks};
pub use tkmap::InstanceHandle;

/// FerroDDS version string.
pub const VERSION: &str = "0.3.0";

#[cfg(test)]
mod scenario_tests;
