//! Budgeted acquisition loop
//!
//! An [`Acquisition`] is what a driver registers with the session when it starts.
//! Every dispatch performs one bounded read through its [`ChunkReader`], publishes
//! the resulting packet and charges it against the sample budget. When the budget is
//! spent, or a stop was requested, it publishes the one and only `END` of the feed
//! and asks the session to deregister it.
//!
//! A failed or empty read aborts the run without `END`; consumers only learn about
//! it through the error returned by [`Session::run`](crate::runtime::Session::run).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, trace, warn};

use crate::runtime::{Packet, PacketBus, SourceCallback, SourceControl};
use crate::{Error, Result};

/// Driver side of an acquisition: one bounded read per call
pub trait ChunkReader: Send {
    /// Read at most `max_samples` samples and wrap them in a LOGIC or ANALOG packet
    fn read_chunk(&mut self, max_samples: usize) -> Result<Packet>;
}

/// How many samples an acquisition may produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleBudget {
    Limited(u64),
    /// No budget; the run lasts until a stop is requested
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Reading,
    /// Stop requested, `END` goes out at the next dispatch
    Draining,
    Done,
}

/// Shared flags for steering an acquisition owned by the session
#[derive(Debug, Clone, Default)]
pub struct AcquisitionControl {
    drain: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl AcquisitionControl {
    /// Ask the loop to end the feed at its next dispatch
    pub fn request_stop(&self) {
        self.drain.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.drain.load(Ordering::Relaxed)
    }

    /// True once the loop has reached `Done`, whether by END, by failure or by being
    /// dropped from the session
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// `DeviceBusy` while the loop behind `control` is still running
    pub fn ensure_idle(control: Option<&AcquisitionControl>, device: &str) -> Result<()> {
        match control {
            Some(control) if !control.is_finished() => {
                warn!("[{}] Start refused, acquisition already running", device);
                Err(Error::DeviceBusy(format!("{} acquisition already running", device)))
            }
            _ => Ok(()),
        }
    }
}

pub struct Acquisition<R: ChunkReader> {
    name: String,
    reader: R,
    remaining: Option<u64>,
    max_chunk: usize,
    state: AcquisitionState,
    control: AcquisitionControl,
    packets_sent: u64,
    samples_sent: u64,
}

impl<R: ChunkReader> Acquisition<R> {
    pub fn new(name: impl Into<String>, reader: R, budget: SampleBudget, max_chunk: usize) -> Self {
        Self {
            name: name.into(),
            reader,
            remaining: match budget {
                SampleBudget::Limited(n) => Some(n),
                SampleBudget::Continuous => None,
            },
            max_chunk: max_chunk.max(1),
            state: AcquisitionState::Idle,
            control: AcquisitionControl::default(),
            packets_sent: 0,
            samples_sent: 0,
        }
    }

    pub fn control(&self) -> AcquisitionControl {
        self.control.clone()
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn samples_sent(&self) -> u64 {
        self.samples_sent
    }

    /// Samples still to be read, None in continuous mode
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Service one readiness event
    pub fn on_ready(&mut self, bus: &mut PacketBus) -> Result<SourceControl> {
        match self.state {
            AcquisitionState::Done => return Ok(SourceControl::Remove),
            AcquisitionState::Idle => {
                debug!("[{}] First dispatch, budget {:?}", self.name, self.remaining);
                self.state = AcquisitionState::Reading;
            }
            _ => {}
        }

        if self.control.stop_requested() {
            self.state = AcquisitionState::Draining;
        }
        if self.state == AcquisitionState::Draining || self.remaining == Some(0) {
            self.finish(bus);
            return Ok(SourceControl::Remove);
        }

        let want = match self.remaining {
            Some(remaining) => remaining.min(self.max_chunk as u64) as usize,
            None => self.max_chunk,
        };

        let packet = match self.reader.read_chunk(want) {
            Ok(packet) => packet,
            Err(e) => return Err(self.abort(e)),
        };

        let count = packet.sample_count();
        if !packet.is_samples() || count < 1 {
            return Err(self.abort(Error::Read(format!(
                "short read: {} of {} samples",
                count, want
            ))));
        }

        trace!("[{}] Read {} samples", self.name, count);
        bus.publish(packet);
        self.packets_sent += 1;
        self.samples_sent += count as u64;
        self.remaining = self.remaining.map(|r| r.saturating_sub(count as u64));

        if self.remaining == Some(0) {
            self.finish(bus);
            return Ok(SourceControl::Remove);
        }
        Ok(SourceControl::Continue)
    }

    /// Box the loop as a session callback
    pub fn into_callback(mut self) -> SourceCallback
    where
        R: 'static,
    {
        Box::new(move |bus| self.on_ready(bus))
    }

    fn finish(&mut self, bus: &mut PacketBus) {
        bus.publish(Packet::End);
        self.state = AcquisitionState::Done;
        self.control.finished.store(true, Ordering::Relaxed);
        info!(
            "[{}] Acquisition finished: {} samples in {} packets",
            self.name, self.samples_sent, self.packets_sent
        );
    }

    fn abort(&mut self, e: Error) -> Error {
        self.state = AcquisitionState::Done;
        self.control.finished.store(true, Ordering::Relaxed);
        error!(
            "[{}] Acquisition aborted after {} samples: {}",
            self.name, self.samples_sent, e
        );
        match e {
            Error::Malloc(_) | Error::Read(_) => e,
            other => Error::Read(other.to_string()),
        }
    }
}

impl<R: ChunkReader> Drop for Acquisition<R> {
    fn drop(&mut self) {
        if self.state != AcquisitionState::Done {
            debug!("[{}] Cancelled after {} samples", self.name, self.samples_sent);
        }
        self.control.finished.store(true, Ordering::Relaxed);
    }
}
