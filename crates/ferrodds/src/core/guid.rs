// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier) and builtin entity ids.

use std::fmt;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

/// GUID prefix length (12 bytes).
pub const GUID_PREFIX_LEN: usize = 12;
/// Entity ID length (4 bytes).
pub const ENTITY_ID_LEN: usize = 4;

/// RTPS Entity ID (4 bytes; last byte is the entity kind).
pub type EntityId = [u8; ENTITY_ID_LEN];

/// RTPS constant: the participant itself.
pub const ENTITYID_PARTICIPANT: EntityId = [0x00, 0x00, 0x01, 0xC1];

/// Builtin SPDP participant announcement writer.
pub const ENTITYID_SPDP_WRITER: EntityId = [0x00, 0x01, 0x00, 0xC2];
/// Builtin SPDP participant announcement reader.
pub const ENTITYID_SPDP_READER: EntityId = [0x00, 0x01, 0x00, 0xC7];

/// Builtin SEDP publications (writer endpoints) writer.
pub const ENTITYID_SEDP_PUBLICATIONS_WRITER: EntityId = [0x00, 0x00, 0x03, 0xC2];
/// Builtin SEDP publications reader.
pub const ENTITYID_SEDP_PUBLICATIONS_READER: EntityId = [0x00, 0x00, 0x03, 0xC7];
/// Builtin SEDP subscriptions (reader endpoints) writer.
pub const ENTITYID_SEDP_SUBSCRIPTIONS_WRITER: EntityId = [0x00, 0x00, 0x04, 0xC2];
/// Builtin SEDP subscriptions reader.
pub const ENTITYID_SEDP_SUBSCRIPTIONS_READER: EntityId = [0x00, 0x00, 0x04, 0xC7];

/// Builtin participant message data (liveliness) writer.
pub const ENTITYID_PMD_WRITER: EntityId = [0x00, 0x02, 0x00, 0xC2];
/// Builtin participant message data reader.
pub const ENTITYID_PMD_READER: EntityId = [0x00, 0x02, 0x00, 0xC7];

/// 12-byte GUID prefix shared by every entity of one participant.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    /// All-zero (invalid) prefix.
    pub const ZERO: GuidPrefix = GuidPrefix([0; GUID_PREFIX_LEN]);

    /// Generate a fresh prefix from host identity, pid, and a process-local
    /// counter. Deterministic inputs, unique per participant per process.
    pub fn generate() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let host = host_id();
        let pid = process::id();
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix[0..4].copy_from_slice(&host.to_be_bytes());
        prefix[4..8].copy_from_slice(&pid.to_be_bytes());
        prefix[8..12].copy_from_slice(&n.to_be_bytes());
        GuidPrefix(prefix)
    }

    /// True iff this is the all-zero prefix.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuidPrefix({})", self)
    }
}

/// RTPS GUID: 12-byte prefix + 4-byte entity id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// Build from prefix and entity id.
    #[must_use]
    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Build from 16 raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        let mut entity_id = [0u8; ENTITY_ID_LEN];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self {
            prefix: GuidPrefix(prefix),
            entity_id,
        }
    }

    /// Serialize to 16 bytes.
    #[must_use]
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix.0);
        bytes[12..16].copy_from_slice(&self.entity_id);
        bytes
    }

    /// The participant GUID sharing this GUID's prefix.
    #[must_use]
    pub fn participant(&self) -> Guid {
        Guid::new(self.prefix, ENTITYID_PARTICIPANT)
    }

    /// All-zero (invalid) GUID.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            prefix: GuidPrefix::ZERO,
            entity_id: [0; ENTITY_ID_LEN],
        }
    }

    /// True iff prefix and entity id are all zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.prefix.is_zero() && self.entity_id.iter().all(|&b| b == 0)
    }

    /// Entity kind: builtin entities have the two top bits of the kind octet set.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.entity_id[3] & 0xC0 == 0xC0
    }

    /// True for writer entity kinds (with or without key, builtin or user).
    #[must_use]
    pub fn is_writer(&self) -> bool {
        matches!(self.entity_id[3] & 0x3F, 0x02 | 0x03)
    }

    /// True for reader entity kinds (with or without key, builtin or user).
    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(self.entity_id[3] & 0x3F, 0x04 | 0x07)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix)?;
        for byte in &self.entity_id {
            write!(f, ".{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// FNV-1a hash of the hostname, stable across the run of a host.
fn host_id() -> u32 {
    let name = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    let mut hash: u32 = 2_166_136_261;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_roundtrip_bytes() {
        let orig = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let guid = Guid::from_bytes(orig);
        assert_eq!(guid.as_bytes(), orig);
    }

    #[test]
    fn test_guid_display() {
        let guid = Guid::new(
            GuidPrefix([1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1]),
            [0, 0, 1, 193],
        );
        assert_eq!(
            guid.to_string(),
            "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
        );
    }

    #[test]
    fn test_prefix_generation_unique() {
        let a = GuidPrefix::generate();
        let b = GuidPrefix::generate();
        assert_ne!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn test_entity_kind_probes() {
        let w = Guid::new(GuidPrefix::ZERO, [0, 0, 0, 0x02]);
        let r = Guid::new(GuidPrefix::ZERO, [0, 0, 0, 0x07]);
        let spdp_w = Guid::new(GuidPrefix::ZERO, ENTITYID_SPDP_WRITER);
        assert!(w.is_writer() && !w.is_reader() && !w.is_builtin());
        assert!(r.is_reader() && !r.is_writer());
        assert!(spdp_w.is_builtin() && spdp_w.is_writer());
    }

    #[test]
    fn test_participant_guid_of_endpoint() {
        let prefix = GuidPrefix::generate();
        let w = Guid::new(prefix, [0, 0, 1, 0x02]);
        assert_eq!(w.participant(), Guid::new(prefix, ENTITYID_PARTICIPANT));
    }
}
