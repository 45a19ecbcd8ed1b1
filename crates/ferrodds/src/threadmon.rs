// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread liveness monitor.
//!
//! Worker threads bracket their work with awake/asleep transitions on a
//! per-thread virtual time counter (odd = awake, even = asleep). The
//! watchdog samples the counters: a thread that has been awake without
//! progressing for longer than the configured bound is reported as stuck.
//! The same counters back the state-change barrier used by deferred frees:
//! once every thread that was awake at the barrier has transitioned, no
//! in-flight reference from before the barrier can remain.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use crate::core::time::{Dur, Mtime};

/// Per-thread observation point.
pub struct ThreadState {
    name: String,
    /// Odd while the thread is awake; incremented on every transition.
    vtime: AtomicU64,
}

impl ThreadState {
    /// Mark the thread awake (entering I/O or a shared-structure section).
    pub fn awake(&self) {
        let v = self.vtime.fetch_add(1, Ordering::AcqRel);
        debug_assert!(v % 2 == 0, "awake() while already awake");
    }

    /// Mark the thread asleep again.
    pub fn asleep(&self) {
        let v = self.vtime.fetch_add(1, Ordering::AcqRel);
        debug_assert!(v % 2 == 1, "asleep() while not awake");
    }

    /// Current virtual time.
    #[must_use]
    pub fn vtime(&self) -> u64 {
        self.vtime.load(Ordering::Acquire)
    }

    /// True while between awake() and asleep().
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.vtime() % 2 == 1
    }

    /// Thread name as registered.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Watched {
    state: Arc<ThreadState>,
    last_vtime: u64,
    last_change: Mtime,
    reported: bool,
}

struct MonInner {
    threads: Mutex<Vec<Arc<ThreadState>>>,
    stuck_bound: Dur,
}

impl MonInner {
    fn sample(&self, watched: &mut Vec<Watched>) {
        let now = Mtime::now();
        let threads = self.threads.lock();
        for state in threads.iter() {
            if !watched.iter().any(|w| Arc::ptr_eq(&w.state, state)) {
                watched.push(Watched {
                    state: state.clone(),
                    last_vtime: state.vtime(),
                    last_change: now,
                    reported: false,
                });
            }
        }
        drop(threads);

        for w in watched.iter_mut() {
            let vtime = w.state.vtime();
            if vtime != w.last_vtime {
                w.last_vtime = vtime;
                w.last_change = now;
                w.reported = false;
                continue;
            }
            let awake = vtime % 2 == 1;
            let stalled = w.last_change.until(now).0 >= self.stuck_bound.0;
            if awake && stalled && !w.reported {
                log::warn!(
                    "[threadmon] thread '{}' awake without progress for {}ms",
                    w.state.name(),
                    w.last_change.until(now).0 / 1_000_000
                );
                w.reported = true;
            }
        }
    }
}

/// The watchdog over all registered worker threads.
pub struct ThreadMonitor {
    inner: Arc<MonInner>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadMonitor {
    /// Create the monitor with the wall-clock stuck bound.
    #[must_use]
    pub fn new(stuck_bound: Dur) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MonInner {
                threads: Mutex::new(Vec::new()),
                stuck_bound,
            }),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Register a worker thread, returning its observation handle.
    pub fn register(&self, name: &str) -> Arc<ThreadState> {
        let state = Arc::new(ThreadState {
            name: name.to_string(),
            vtime: AtomicU64::new(0),
        });
        self.inner.threads.lock().push(state.clone());
        state
    }

    /// Start the watchdog thread.
    pub fn start(&self) {
        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let handle = std::thread::Builder::new()
            .name("threadmon".to_string())
            .spawn(move || {
                let mut watched: Vec<Watched> = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    inner.sample(&mut watched);
                    std::thread::sleep(StdDuration::from_millis(100));
                }
            });
        match handle {
            Ok(h) => *self.handle.lock() = Some(h),
            Err(e) => log::error!("[threadmon] failed to start watchdog: {e}"),
        }
    }

    /// Stop and join the watchdog.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Block until every thread that is awake right now has either gone to
    /// sleep or advanced its virtual time.
    pub fn statechange_barrier(&self) {
        let snapshot: Vec<(Arc<ThreadState>, u64)> = self
            .inner
            .threads
            .lock()
            .iter()
            .map(|t| (t.clone(), t.vtime()))
            .collect();
        for (state, vtime) in snapshot {
            if vtime % 2 == 0 {
                continue; // was asleep: cannot hold a pre-barrier reference
            }
            while state.vtime() == vtime {
                std::thread::sleep(StdDuration::from_millis(1));
            }
        }
    }
}
