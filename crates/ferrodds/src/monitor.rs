// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Debug monitor: a read-only text dump of live state over TCP.
//!
//! Each accepted connection gets one snapshot (participants, endpoints,
//! match tables, history-cache state, address sets, then registered
//! plugins) and is closed. No command parsing. Writes go through the
//! blocking socket, so backpressure from a slow client simply slows the
//! dump down.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use parking_lot::Mutex;

use crate::core::Result;
use crate::entity::EntityIndex;
use crate::tkmap::TkMap;

/// A plugin appends its own section to every dump.
pub type MonitorPlugin = Box<dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync>;

/// The debug monitor server.
pub struct DebugMonitor {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    plugins: Arc<Mutex<Vec<MonitorPlugin>>>,
}

impl DebugMonitor {
    /// Bind the listener and start the server thread.
    pub fn start(index: Arc<EntityIndex>, tkmap: Arc<TkMap>, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        log::info!("[debmon] listening on {local_addr}");

        let stop = Arc::new(AtomicBool::new(false));
        let plugins: Arc<Mutex<Vec<MonitorPlugin>>> = Arc::new(Mutex::new(Vec::new()));

        let stop2 = stop.clone();
        let plugins2 = plugins.clone();
        let handle = std::thread::Builder::new()
            .name("debmon".to_string())
            .spawn(move || {
                while !stop2.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((mut stream, peer)) => {
                            log::debug!("[debmon] dump requested by {peer}");
                            let _ = stream.set_nonblocking(false);
                            if let Err(e) = dump(&mut stream, &index, &tkmap, &plugins2) {
                                log::debug!("[debmon] dump to {peer} aborted: {e}");
                            }
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            std::thread::sleep(StdDuration::from_millis(50));
                        }
                        Err(e) => {
                            log::warn!("[debmon] accept failed: {e}");
                            std::thread::sleep(StdDuration::from_millis(200));
                        }
                    }
                }
            })?;

        Ok(Self {
            local_addr,
            stop,
            handle: Mutex::new(Some(handle)),
            plugins,
        })
    }

    /// The bound listener address (port 0 resolves here).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Append a plugin to the dump chain. Plugins can only be added, never
    /// removed, so a dump in progress never races a removal.
    pub fn add_plugin(&self, plugin: MonitorPlugin) {
        self.plugins.lock().push(plugin);
    }

    /// Stop the server thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DebugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Write one full snapshot.
fn dump(
    out: &mut dyn Write,
    index: &EntityIndex,
    tkmap: &TkMap,
    plugins: &Mutex<Vec<MonitorPlugin>>,
) -> io::Result<()> {
    writeln!(out, "participants:")?;
    for pp in index.participants() {
        writeln!(out, "  participant {}", pp.guid)?;
        for loc in pp.addrset.to_vec() {
            writeln!(out, "    addr {loc}")?;
        }
        for endpoint in pp.endpoints() {
            if let Some(writer) = index.lookup_writer(&endpoint) {
                let st = writer.whc.state();
                writeln!(
                    out,
                    "    writer {} topic {} seq [{},{}] unacked {}B acks {} nacks {} rexmit {} (lost {}) throttle {}{}",
                    writer.guid,
                    writer.topic.name,
                    st.min_seq,
                    st.max_seq,
                    st.unacked_bytes,
                    st.counters.num_acks_received,
                    st.counters.num_nacks_received,
                    st.counters.rexmit_count,
                    st.counters.rexmit_lost_count,
                    st.counters.throttle_count,
                    if st.throttling { " [throttling]" } else { "" },
                )?;
                for peer in writer.matched_subscriptions() {
                    writeln!(out, "      matched reader {peer}")?;
                }
            } else if let Some(reader) = index.lookup_reader(&endpoint) {
                writeln!(
                    out,
                    "    reader {} topic {} instances {} samples {}",
                    reader.guid,
                    reader.topic.name,
                    reader.rhc.instance_count(),
                    reader.rhc.sample_count(),
                )?;
                for inst in reader.rhc.snapshot() {
                    writeln!(
                        out,
                        "      instance {:#x} {:?}/{:?} samples {} unread {}",
                        inst.handle.raw(),
                        inst.istate,
                        inst.view,
                        inst.samples,
                        inst.unread,
                    )?;
                }
                for peer in reader.matched_publications() {
                    writeln!(out, "      matched writer {peer}")?;
                }
            }
        }
    }

    writeln!(out, "proxy participants:")?;
    for pp in index.proxy_participants() {
        writeln!(out, "  proxypp {}", pp.guid)?;
        if let Some(privileged) = pp.privileged_pp_guid {
            writeln!(out, "    privileged {privileged}")?;
        }
        for loc in pp.addrset.to_vec() {
            writeln!(out, "    addr {loc}")?;
        }
        for endpoint in pp.endpoints() {
            if let Some(pw) = index.lookup_proxy_writer(&endpoint) {
                writeln!(out, "    proxy writer {} topic {}", pw.guid, pw.topic_name)?;
            } else if let Some(pr) = index.lookup_proxy_reader(&endpoint) {
                writeln!(out, "    proxy reader {} topic {}", pr.guid, pr.topic_name)?;
            }
        }
    }

    writeln!(out, "instances: {}", tkmap.len())?;

    for plugin in plugins.lock().iter() {
        plugin(out)?;
    }
    writeln!(out, "end")?;
    Ok(())
}
