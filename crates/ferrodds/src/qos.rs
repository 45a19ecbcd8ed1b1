// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS (Quality of Service) policies and request/offer compatibility.
//!
//! A [`Qos`] is the snapshot attached to an endpoint at creation. Matching
//! applies the DDS request-vs-offered rules: for ordered policies the writer
//! must offer at least what the reader requests; for symmetric policies both
//! sides must agree. [`Qos::compatible`] returns the first offending policy
//! so discovery can report `requested_incompatible_qos` precisely.

use crate::core::time::Dur;

/// Reliability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Fire-and-forget; gaps permitted, duplicates prohibited.
    #[default]
    BestEffort,
    /// ACK/NACK-driven retransmission; in-order, no-gap delivery.
    Reliable,
}

impl Reliability {
    fn rank(self) -> u8 {
        match self {
            Reliability::BestEffort => 0,
            Reliability::Reliable => 1,
        }
    }
}

/// Durability policy (ordered: later variants offer strictly more).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Durability {
    /// No samples kept for late joiners.
    #[default]
    Volatile,
    /// Writer keeps history for late joiners while it lives.
    TransientLocal,
}

/// History policy: how many samples are retained per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum History {
    /// Keep the `n` most recent samples per instance.
    KeepLast(u32),
    /// Keep everything within resource limits.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        History::KeepLast(1)
    }
}

/// Ownership policy (must match exactly between writer and reader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// Multiple writers may update an instance.
    #[default]
    Shared,
    /// The strongest writer owns each instance.
    Exclusive,
}

/// Liveliness assertion kind (ordered: Automatic is the weakest offer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LivelinessKind {
    /// The stack asserts liveliness on the writer's behalf.
    #[default]
    Automatic,
    /// Any write by any writer of the participant asserts liveliness.
    ManualByParticipant,
    /// Only writes to the topic assert liveliness.
    ManualByTopic,
}

/// Liveliness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Dur,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: Dur::NEVER,
        }
    }
}

/// Destination order policy (ordered: by-source offers more).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DestinationOrder {
    /// Order by arrival at the reader.
    #[default]
    ByReceptionTimestamp,
    /// Order by the writer-provided source timestamp.
    BySourceTimestamp,
}

/// Deadline policy: maximum expected period between samples per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Dur);

impl Default for Deadline {
    fn default() -> Self {
        Deadline(Dur::NEVER)
    }
}

/// Latency budget policy: delivery-delay hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyBudget(pub Dur);

/// Partition policy: logical separation within a domain.
///
/// An empty set behaves as the single default partition `""`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition(pub Vec<String>);

impl Partition {
    /// True iff the effective partition sets of `self` and `other` intersect.
    #[must_use]
    pub fn intersects(&self, other: &Partition) -> bool {
        let a = self.effective();
        let b = other.effective();
        a.iter().any(|p| b.contains(p))
    }

    fn effective(&self) -> Vec<&str> {
        if self.0.is_empty() {
            vec![""]
        } else {
            self.0.iter().map(String::as_str).collect()
        }
    }
}

/// Resource limits for a history cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_samples: usize,
    pub max_instances: usize,
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 100_000,
            max_instances: 10_000,
            max_samples_per_instance: 100_000,
        }
    }
}

/// Opaque user data attached to an entity, exchanged during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserData(pub Vec<u8>);

/// Identifies the QoS policy that broke a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosPolicyId {
    UserData = 1,
    Durability = 2,
    Deadline = 4,
    LatencyBudget = 5,
    Ownership = 6,
    Liveliness = 8,
    Partition = 10,
    Reliability = 11,
    DestinationOrder = 12,
    History = 13,
    ResourceLimits = 14,
}

/// Endpoint QoS snapshot, merged with the participant defaults at create time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Qos {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub ownership: Ownership,
    pub liveliness: Liveliness,
    pub destination_order: DestinationOrder,
    pub deadline: Deadline,
    pub latency_budget: LatencyBudget,
    pub partition: Partition,
    pub resource_limits: ResourceLimits,
    pub user_data: UserData,
    /// When set on a writer, deleting the writer disposes its live instances.
    pub autodispose_unregistered_instances: bool,
    /// Suppress matches with endpoints of the own participant.
    pub ignore_local: bool,
    /// Bound on throttled writes; `NEVER` blocks indefinitely.
    pub max_blocking_time: Dur,
}

impl Qos {
    /// Reliable, keep-all profile.
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            history: History::KeepAll,
            max_blocking_time: crate::config::MAX_BLOCKING_TIME,
            ..Self::default()
        }
    }

    /// Best-effort keep-last(1) profile.
    #[must_use]
    pub fn best_effort() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            history: History::KeepLast(1),
            ..Self::default()
        }
    }

    /// Validate invariants checked at endpoint creation.
    pub fn validate(&self) -> Result<(), String> {
        if let History::KeepLast(0) = self.history {
            return Err("History::KeepLast(n) requires n > 0".to_string());
        }
        if self.resource_limits.max_samples == 0 {
            return Err("ResourceLimits.max_samples must be > 0".to_string());
        }
        if self.deadline.0 .0 <= 0 && !self.deadline.0.is_never() {
            return Err("Deadline period must be positive".to_string());
        }
        Ok(())
    }

    /// Request-vs-offered compatibility: can `offered` (a writer's QoS) serve
    /// `requested` (a reader's QoS)? Returns the first offending policy.
    pub fn compatible(offered: &Qos, requested: &Qos) -> Result<(), QosPolicyId> {
        if offered.reliability.rank() < requested.reliability.rank() {
            return Err(QosPolicyId::Reliability);
        }
        if offered.durability < requested.durability {
            return Err(QosPolicyId::Durability);
        }
        // Deadline: the writer must update at least as often as the reader
        // expects. NEVER compares greatest, which is exactly right.
        if offered.deadline.0 > requested.deadline.0 {
            return Err(QosPolicyId::Deadline);
        }
        if offered.latency_budget.0 > requested.latency_budget.0 {
            return Err(QosPolicyId::LatencyBudget);
        }
        if offered.ownership != requested.ownership {
            return Err(QosPolicyId::Ownership);
        }
        if offered.liveliness.kind < requested.liveliness.kind
            || offered.liveliness.lease_duration > requested.liveliness.lease_duration
        {
            return Err(QosPolicyId::Liveliness);
        }
        if offered.destination_order < requested.destination_order {
            return Err(QosPolicyId::DestinationOrder);
        }
        if !offered.partition.intersects(&requested.partition) {
            return Err(QosPolicyId::Partition);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_qos_is_self_compatible() {
        let qos = Qos::default();
        assert!(Qos::compatible(&qos, &qos).is_ok());
        assert!(qos.validate().is_ok());
    }

    #[test]
    fn test_best_effort_writer_cannot_serve_reliable_reader() {
        let w = Qos::best_effort();
        let r = Qos::reliable();
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Reliability));
        // The reverse direction is fine.
        assert!(Qos::compatible(&r, &w).is_ok());
    }

    #[test]
    fn test_durability_ordering() {
        let mut w = Qos::default();
        let mut r = Qos::default();
        r.durability = Durability::TransientLocal;
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Durability));
        w.durability = Durability::TransientLocal;
        assert!(Qos::compatible(&w, &r).is_ok());
    }

    #[test]
    fn test_deadline_compatibility() {
        let mut w = Qos::default();
        let mut r = Qos::default();
        // Writer promises 100ms updates, reader expects 1s: fine.
        w.deadline = Deadline(Dur::from_millis(100));
        r.deadline = Deadline(Dur::from_secs(1));
        assert!(Qos::compatible(&w, &r).is_ok());
        // Writer with no deadline cannot serve a reader that wants one.
        w.deadline = Deadline::default();
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Deadline));
    }

    #[test]
    fn test_ownership_must_match() {
        let mut w = Qos::default();
        w.ownership = Ownership::Exclusive;
        let r = Qos::default();
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Ownership));
    }

    #[test]
    fn test_partition_intersection() {
        let mut w = Qos::default();
        let mut r = Qos::default();
        // Both empty: default partition matches.
        assert!(Qos::compatible(&w, &r).is_ok());

        w.partition = Partition(vec!["sensors".into()]);
        r.partition = Partition(vec!["control".into()]);
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Partition));

        r.partition = Partition(vec!["control".into(), "sensors".into()]);
        assert!(Qos::compatible(&w, &r).is_ok());

        // Named partition does not intersect the default one.
        r.partition = Partition(Vec::new());
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Partition));
    }

    #[test]
    fn test_liveliness_compatibility() {
        let mut w = Qos::default();
        let mut r = Qos::default();
        r.liveliness = Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: Dur::from_millis(500),
        };
        // Writer offers NEVER lease: too weak.
        assert_eq!(Qos::compatible(&w, &r), Err(QosPolicyId::Liveliness));
        w.liveliness = Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: Dur::from_millis(100),
        };
        assert!(Qos::compatible(&w, &r).is_ok());
    }

    #[test]
    fn test_validate_rejects_keep_last_zero() {
        let mut qos = Qos::default();
        qos.history = History::KeepLast(0);
        assert!(qos.validate().is_err());
    }
}
