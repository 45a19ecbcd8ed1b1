// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration: protocol constants and the runtime `Config` value.
//!
//! Two levels, both consumed by the core:
//!
//! - **Static**: RTPS timing constants and internal tuning knobs. Never
//!   hardcode these elsewhere.
//! - **Dynamic**: [`Config`], the value handed to [`crate::domain::Domain`]
//!   at startup, fanned out through a lock-free [`ConfigHandle`].

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::core::time::Dur;

// =======================================================================
// Timing constants (RTPS v2.5 defaults unless noted)
// =======================================================================

/// SPDP announcement period. Participants re-announce themselves at this
/// cadence; peers renew the proxy participant lease on receipt.
pub const SPDP_INTERVAL: Dur = Dur::from_secs(3);

/// Default participant lease duration (10x the announcement period).
pub const PARTICIPANT_LEASE_DURATION: Dur = Dur::from_secs(30);

/// Re-arm interval for a proxy participant whose lease expired while its
/// privileged participant is still live. Must stay well below the pruning
/// time of deleted-participant records.
pub const LEASE_RESCUE_INTERVAL: Dur = Dur::from_millis(200);

/// Minimum interval between heartbeats to lagging reliable readers.
pub const HB_INTERVAL_MIN: Dur = Dur::from_millis(100);

/// Cap of the heartbeat backoff. The interval doubles from
/// [`HB_INTERVAL_MIN`] for every heartbeat sent without an intervening ACK.
pub const HB_INTERVAL_MAX: Dur = Dur::from_secs(5);

/// Number of sharded per-lease locks (power of two).
pub const N_LEASE_LOCKS: usize = 16;

/// Default high watermark of a writer history cache, in unacknowledged bytes.
pub const WHC_HIGH_WATER: usize = 500 * 1024;

/// Default low watermark: a throttled writer unblocks once unacknowledged
/// bytes drop to this level.
pub const WHC_LOW_WATER: usize = 100 * 1024;

/// Default bound on `write` blocking while throttled.
pub const MAX_BLOCKING_TIME: Dur = Dur::from_millis(100);

/// Wall-clock bound after which a continuously-awake worker thread is
/// reported as stuck.
pub const THREADMON_STUCK_BOUND: Dur = Dur::from_secs(10);

/// Poll bound of a connectionless receive channel (how long a receive
/// thread blocks in one read before re-checking for shutdown).
pub const RECV_POLL_INTERVAL: Dur = Dur::from_millis(100);

// =======================================================================
// Runtime configuration
// =======================================================================

/// Which transport the domain runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSelector {
    /// Connectionless UDPv4.
    #[default]
    Udp,
    /// Stream TCPv4 with the connection cache.
    Tcp,
    /// Stream TCPv6 with the connection cache.
    Tcp6,
}

/// Receive-thread mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecvMode {
    /// One thread multiplexes many sockets through the wait-set.
    #[default]
    Many,
    /// One dedicated thread per socket.
    Single,
}

/// Runtime configuration consumed by the core.
#[derive(Debug, Clone)]
pub struct Config {
    /// DDS domain id.
    pub domain_id: u32,
    /// Transport the domain runs on.
    pub transport_selector: TransportSelector,
    /// Bound on a single TCP read (per `select` round).
    pub tcp_read_timeout: Dur,
    /// Bound on completing one message write; exceeding it mid-message is
    /// fatal to the connection.
    pub tcp_write_timeout: Dur,
    /// Debug monitor listener port; `None` disables the monitor.
    pub monitor_port: Option<u16>,
    /// TLS-backed TCP factory (backend supplied by the embedder).
    pub ssl_enable: bool,
    /// Number of receive threads (>= 1).
    pub n_recv_threads: usize,
    /// Socket-to-thread assignment for receive threads.
    pub recv_mode: RecvMode,
    /// SPDP announcement period.
    pub spdp_interval: Dur,
    /// Lease duration advertised for the local participant.
    pub lease_duration: Dur,
    /// Writer history cache high watermark (bytes).
    pub whc_high_water: usize,
    /// Writer history cache low watermark (bytes).
    pub whc_low_water: usize,
    /// Default bound on throttled `write` blocking.
    pub max_blocking_time: Dur,
    /// Thread liveness watchdog bound.
    pub threadmon_bound: Dur,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain_id: 0,
            transport_selector: TransportSelector::default(),
            tcp_read_timeout: Dur::from_secs(2),
            tcp_write_timeout: Dur::from_secs(2),
            monitor_port: None,
            ssl_enable: false,
            n_recv_threads: 1,
            recv_mode: RecvMode::default(),
            spdp_interval: SPDP_INTERVAL,
            lease_duration: PARTICIPANT_LEASE_DURATION,
            whc_high_water: WHC_HIGH_WATER,
            whc_low_water: WHC_LOW_WATER,
            max_blocking_time: MAX_BLOCKING_TIME,
            threadmon_bound: THREADMON_STUCK_BOUND,
        }
    }
}

impl Config {
    /// Validate invariants that other components rely on.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_recv_threads == 0 {
            return Err("n_recv_threads must be >= 1".to_string());
        }
        if self.whc_low_water > self.whc_high_water {
            return Err(format!(
                "whc_low_water ({}) must be <= whc_high_water ({})",
                self.whc_low_water, self.whc_high_water
            ));
        }
        if self.lease_duration.0 <= 0 {
            return Err("lease_duration must be positive".to_string());
        }
        Ok(())
    }
}

/// Lock-free handle to the live configuration.
///
/// Readers pay one atomic load per access; a reconfiguration swaps the whole
/// value so in-flight readers keep a consistent snapshot.
pub struct ConfigHandle {
    inner: ArcSwap<Config>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn load(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Replace the live configuration.
    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }
}
