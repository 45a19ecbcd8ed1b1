// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic and wall-clock time as signed 64-bit nanosecond counts.
//!
//! All deadlines in the stack (leases, heartbeat schedules, throttle
//! timeouts) are `Mtime` values on a process-local monotonic axis anchored at
//! first use. Sample timestamps are `Wtime` (nanoseconds since the Unix
//! epoch). `T_NEVER` is the "no deadline" sentinel on both axes.

use std::sync::OnceLock;
use std::time::{Duration as StdDuration, Instant, SystemTime, UNIX_EPOCH};

/// "Never" sentinel for both time axes and durations.
pub const T_NEVER: i64 = i64::MAX;

/// One millisecond in nanoseconds.
pub const T_MILLISECOND: i64 = 1_000_000;

/// One second in nanoseconds.
pub const T_SECOND: i64 = 1_000_000_000;

fn monotonic_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Monotonic time in nanoseconds since the process anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mtime(pub i64);

impl Mtime {
    /// The never-reached deadline.
    pub const NEVER: Mtime = Mtime(T_NEVER);

    /// Current monotonic time.
    pub fn now() -> Self {
        let elapsed = monotonic_anchor().elapsed();
        Mtime(i64::try_from(elapsed.as_nanos()).unwrap_or(T_NEVER))
    }

    /// Add a duration, saturating at `T_NEVER`; `NEVER + anything = NEVER`.
    #[must_use]
    pub fn add_dur(self, d: Dur) -> Self {
        if self.0 == T_NEVER || d.0 == T_NEVER {
            Mtime::NEVER
        } else {
            Mtime(self.0.saturating_add(d.0))
        }
    }

    /// Duration from `self` until `later` (zero if `later` is earlier).
    #[must_use]
    pub fn until(self, later: Mtime) -> Dur {
        if later.0 == T_NEVER {
            Dur::NEVER
        } else {
            Dur(later.0.saturating_sub(self.0).max(0))
        }
    }

    /// True iff this is the `T_NEVER` sentinel.
    #[must_use]
    pub fn is_never(self) -> bool {
        self.0 == T_NEVER
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch (sample timestamps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wtime(pub i64);

impl Wtime {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(StdDuration::ZERO);
        Wtime(i64::try_from(since_epoch.as_nanos()).unwrap_or(T_NEVER))
    }
}

/// Signed duration in nanoseconds; `T_NEVER` means infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Dur(pub i64);

impl Dur {
    /// Infinite duration.
    pub const NEVER: Dur = Dur(T_NEVER);
    /// Zero duration.
    pub const ZERO: Dur = Dur(0);

    /// Construct from milliseconds.
    #[must_use]
    pub const fn from_millis(ms: i64) -> Self {
        Dur(ms.saturating_mul(T_MILLISECOND))
    }

    /// Construct from seconds.
    #[must_use]
    pub const fn from_secs(s: i64) -> Self {
        Dur(s.saturating_mul(T_SECOND))
    }

    /// True iff this is the infinite duration.
    #[must_use]
    pub fn is_never(self) -> bool {
        self.0 == T_NEVER
    }

    /// Convert to `std::time::Duration`, clamping negatives to zero.
    ///
    /// `NEVER` maps to the largest representable std duration.
    #[must_use]
    pub fn to_std(self) -> StdDuration {
        if self.0 == T_NEVER {
            StdDuration::MAX
        } else {
            StdDuration::from_nanos(u64::try_from(self.0).unwrap_or(0))
        }
    }
}
