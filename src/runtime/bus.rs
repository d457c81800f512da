//! Synchronous packet fan-out
//!
//! The bus hands every published packet to each subscriber in subscription order,
//! on the caller's thread. A failing subscriber is logged and skipped; the rest still
//! receive the packet. There is no queueing: a slow subscriber directly delays the
//! producer's next read.

use tracing::{debug, trace, warn};

use super::errors::SinkResult;
use super::packet::{Packet, PacketKind};

/// A consumer of data feed packets
pub trait PacketSink: Send {
    /// Debug name used in log messages
    fn name(&self) -> &str;

    /// Handle one packet
    fn deliver(&mut self, packet: &Packet) -> SinkResult;
}

/// Where the bus is within a feed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedState {
    /// No header seen yet, or the previous feed ended
    Idle,
    /// Header delivered, samples may follow
    Streaming,
}

/// Outcome of one `publish()` call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
    /// The packet violated feed order and was not delivered
    pub dropped: bool,
}

/// Single dispatch point between producers and consumers
pub struct PacketBus {
    subscribers: Vec<Box<dyn PacketSink>>,
    state: FeedState,
    packets_published: u64,
    delivery_failures: u64,
}

impl PacketBus {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            state: FeedState::Idle,
            packets_published: 0,
            delivery_failures: 0,
        }
    }

    /// Add a subscriber; it receives packets after all earlier subscribers
    pub fn subscribe<S: PacketSink + 'static>(&mut self, sink: S) {
        debug!("Bus: subscribing '{}'", sink.name());
        self.subscribers.push(Box::new(sink));
    }

    /// Remove and return all subscribers
    pub fn take_subscribers(&mut self) -> Vec<Box<dyn PacketSink>> {
        std::mem::take(&mut self.subscribers)
    }

    pub fn num_subscribers(&self) -> usize {
        self.subscribers.len()
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn packets_published(&self) -> u64 {
        self.packets_published
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures
    }

    /// Deliver a packet to every subscriber in order
    ///
    /// Sample and trigger packets outside a feed (before its HEADER or after its END)
    /// are dropped with a warning, so consumers never observe packets after END.
    pub fn publish(&mut self, packet: Packet) -> PublishReport {
        let kind = packet.kind();
        if self.state == FeedState::Idle && kind != PacketKind::Header {
            warn!("Bus: dropping {} published outside a feed", packet);
            return PublishReport {
                dropped: true,
                ..PublishReport::default()
            };
        }

        trace!("Bus: publishing {}", packet);
        let mut report = PublishReport::default();
        for sink in self.subscribers.iter_mut() {
            match sink.deliver(&packet) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Bus: subscriber '{}' failed on {:?}: {}", sink.name(), kind, e);
                    report.failed += 1;
                }
            }
        }

        self.packets_published += 1;
        self.delivery_failures += report.failed as u64;
        self.state = match kind {
            PacketKind::Header => FeedState::Streaming,
            PacketKind::End => FeedState::Idle,
            _ => self.state,
        };
        report
    }
}

impl Default for PacketBus {
    fn default() -> Self {
        Self::new()
    }
}
