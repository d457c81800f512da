//! Single-threaded, readiness-driven event loop
//!
//! A [`Session`] owns the [`PacketBus`] and a set of registered sources. Each source
//! pairs a readiness signal with a callback:
//!
//! 1. **Channel readiness**: the source becomes ready when a token arrives on a
//!    crossbeam channel (the poll-descriptor analogue for real hardware).
//! 2. **Timer readiness**: the source fires every `timeout`.
//!
//! A channel source whose token has not arrived by its timeout also fires, so a
//! stalled device gets a chance to report a failed read.
//!
//! Callbacks run one at a time on the thread calling [`Session::run`], which is what
//! makes device and encoder state safe to mutate without locking. Removing a source
//! between callbacks is the cancellation primitive; a callback is never interrupted.

use crossbeam_channel::{Receiver as CrossbeamReceiver, Select};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::bus::PacketBus;
use crate::{Error, Result};

/// Identifier of a registered source, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// What makes a source ready to be serviced
pub enum Readiness {
    /// Ready when a token is received (or the sending side hangs up)
    Channel(CrossbeamReceiver<()>),
    /// Ready every time its timeout elapses
    Timer,
}

/// Returned by a source callback to keep or drop its registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceControl {
    Continue,
    Remove,
}

/// Source callback. Errors remove the source and are reported by [`Session::run`].
pub type SourceCallback = Box<dyn FnMut(&mut PacketBus) -> Result<SourceControl> + Send>;

struct Registration {
    id: SourceId,
    name: String,
    readiness: Readiness,
    timeout: Duration,
    due: Instant,
    callback: SourceCallback,
    dispatches: u64,
}

/// Handle for stopping a running session from another thread
#[derive(Clone)]
pub struct SessionHandle {
    stop_signal: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Ask `run()` to return after the current dispatch
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }
}

/// Event loop plus packet bus for one acquisition session
pub struct Session {
    sources: Vec<Registration>,
    bus: PacketBus,
    next_id: u64,
    stop_signal: Arc<AtomicBool>,
    errors: Vec<(SourceId, Error)>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            bus: PacketBus::new(),
            next_id: 0,
            stop_signal: Arc::new(AtomicBool::new(false)),
            errors: Vec::new(),
        }
    }

    pub fn bus(&self) -> &PacketBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut PacketBus {
        &mut self.bus
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            stop_signal: Arc::clone(&self.stop_signal),
        }
    }

    /// Register a source; `timeout` is its poll timeout (timer period for timers)
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        readiness: Readiness,
        timeout: Duration,
        callback: SourceCallback,
    ) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        debug!("[{}] Registered as {} (timeout {:?})", name, id, timeout);
        self.sources.push(Registration {
            id,
            name,
            readiness,
            timeout,
            due: Instant::now() + timeout,
            callback,
            dispatches: 0,
        });
        id
    }

    /// Deregister a source. Returns false if it was not registered.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        match self.sources.iter().position(|r| r.id == id) {
            Some(pos) => {
                let reg = self.sources.remove(pos);
                debug!("[{}] Deregistered after {} dispatches", reg.name, reg.dispatches);
                true
            }
            None => false,
        }
    }

    pub fn has_source(&self, id: SourceId) -> bool {
        self.sources.iter().any(|r| r.id == id)
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Signal `run()` to return
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Errors collected from failed source callbacks, oldest first
    pub fn take_errors(&mut self) -> Vec<(SourceId, Error)> {
        std::mem::take(&mut self.errors)
    }

    /// Wait for at least one source to become ready and service every ready source once
    ///
    /// Returns the number of callbacks invoked.
    pub fn iteration(&mut self) -> usize {
        if self.sources.is_empty() {
            return 0;
        }

        let ready = self.wait_ready();
        let mut dispatched = 0;
        for id in ready {
            let Some(pos) = self.sources.iter().position(|r| r.id == id) else {
                continue;
            };
            let reg = &mut self.sources[pos];
            reg.dispatches += 1;
            reg.due = Instant::now() + reg.timeout;
            dispatched += 1;

            match (reg.callback)(&mut self.bus) {
                Ok(SourceControl::Continue) => {}
                Ok(SourceControl::Remove) => {
                    self.remove_source(id);
                }
                Err(e) => {
                    error!("[{}] Source failed: {}", reg.name, e);
                    self.remove_source(id);
                    self.errors.push((id, e));
                }
            }
        }
        dispatched
    }

    /// Run until every source has deregistered or `stop()` is called
    ///
    /// Returns the first source error, if any source failed.
    pub fn run(&mut self) -> Result<()> {
        info!("Session: running with {} sources", self.sources.len());
        let mut dispatched = 0u64;
        while !self.sources.is_empty() {
            if self.stop_signal.load(Ordering::Relaxed) {
                info!("Session: stop signal received");
                break;
            }
            dispatched += self.iteration() as u64;
        }
        self.stop_signal.store(false, Ordering::Relaxed);
        info!(
            "Session: finished after {} dispatches, {} packets published",
            dispatched,
            self.bus.packets_published()
        );

        match self.errors.first() {
            Some(_) => {
                let (_, first) = self.errors.remove(0);
                Err(first)
            }
            None => Ok(()),
        }
    }

    /// Block until a channel source signals or the earliest deadline passes; return
    /// the ids of the sources to service, in registration order.
    fn wait_ready(&self) -> Vec<SourceId> {
        let deadline = self
            .sources
            .iter()
            .map(|r| r.due)
            .min()
            .unwrap_or_else(Instant::now);

        let channels: Vec<(usize, &CrossbeamReceiver<()>)> = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match &r.readiness {
                Readiness::Channel(rx) => Some((i, rx)),
                Readiness::Timer => None,
            })
            .collect();

        let mut signalled = None;
        if channels.is_empty() {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        } else {
            let mut select = Select::new();
            for &(_, rx) in &channels {
                select.recv(rx);
            }
            if let Ok(op) = select.select_deadline(deadline) {
                let (source_index, rx) = channels[op.index()];
                // A hang-up also counts as readiness; the callback sees the failure.
                let _ = op.recv(rx);
                signalled = Some(source_index);
            }
        }

        let now = Instant::now();
        self.sources
            .iter()
            .enumerate()
            .filter(|(i, r)| signalled == Some(*i) || r.due <= now)
            .map(|(_, r)| r.id)
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
