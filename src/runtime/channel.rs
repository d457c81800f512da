//! Cross-thread packet delivery for live consumers
//!
//! - [`ChannelSink`] is a bus subscriber that forwards packets into a bounded
//!   crossbeam channel (blocking by default, or lossy when the consumer must never
//!   stall acquisition).
//! - [`PacketReceiver`] is the consumer end. It keeps a putback buffer for `peek`
//!   and remembers end-of-stream: once `END` has been handed out, or the sink has
//!   been dropped, every later receive returns `None`.

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, Sender as CrossbeamSender};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::bus::PacketSink;
use super::errors::{DeliveryError, SinkResult};
use super::packet::Packet;

/// Bus subscriber that forwards every packet over a bounded channel
pub struct ChannelSink {
    name: String,
    sender: CrossbeamSender<Packet>,
    lossy: bool,
    connected: bool,
}

impl ChannelSink {
    /// Create a connected sink/receiver pair holding at most `capacity` packets in flight
    pub fn bounded(capacity: usize) -> (Self, PacketReceiver) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (
            Self {
                name: "channel_sink".to_string(),
                sender,
                lossy: false,
                connected: true,
            },
            PacketReceiver::new(receiver),
        )
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Drop packets instead of blocking when the queue is full
    pub fn lossy(mut self) -> Self {
        self.lossy = true;
        self
    }

    /// False once a delivery found the consumer end dropped
    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl PacketSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &Packet) -> SinkResult {
        let result = if self.lossy {
            self.sender.try_send(packet.clone()).map_err(DeliveryError::from)
        } else {
            self.sender.send(packet.clone()).map_err(DeliveryError::from)
        };
        if let Err(DeliveryError::Disconnected(_)) = &result {
            if self.connected {
                debug!("[{}] Consumer disconnected", self.name);
            }
            self.connected = false;
        }
        result
    }
}

/// Consumer end of a [`ChannelSink`]
pub struct PacketReceiver {
    receiver: CrossbeamReceiver<Packet>,
    buffer: VecDeque<Packet>,
    eos: bool,
}

impl PacketReceiver {
    fn new(receiver: CrossbeamReceiver<Packet>) -> Self {
        Self {
            receiver,
            buffer: VecDeque::new(),
            eos: false,
        }
    }

    /// Blocking receive. Returns from the putback buffer first.
    ///
    /// Returns `None` after `END` has been received or the sink was dropped.
    pub fn recv(&mut self) -> Option<Packet> {
        if let Some(packet) = self.buffer.pop_front() {
            return Some(self.note(packet));
        }
        if self.eos {
            return None;
        }
        match self.receiver.recv() {
            Ok(packet) => Some(self.note(packet)),
            Err(_) => {
                debug!("PacketReceiver::recv() - channel disconnected");
                self.eos = true;
                None
            }
        }
    }

    /// Receive with a timeout; `Ok(None)` means end-of-stream
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>, RecvTimeoutError> {
        if let Some(packet) = self.buffer.pop_front() {
            return Ok(Some(self.note(packet)));
        }
        if self.eos {
            return Ok(None);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(self.note(packet))),
            Err(RecvTimeoutError::Disconnected) => {
                self.eos = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Peek at the next packet without consuming it
    pub fn peek(&mut self) -> Option<&Packet> {
        if self.buffer.is_empty() && !self.eos {
            match self.receiver.recv() {
                Ok(packet) => self.buffer.push_back(packet),
                Err(_) => self.eos = true,
            }
        }
        self.buffer.front()
    }

    /// Return a packet to the front of the queue
    pub fn put_back(&mut self, packet: Packet) {
        self.buffer.push_front(packet);
    }

    /// Receive until end-of-stream, collecting everything
    pub fn collect_until_end(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = self.recv() {
            packets.push(packet);
        }
        packets
    }

    pub fn is_finished(&self) -> bool {
        self.eos && self.buffer.is_empty()
    }

    fn note(&mut self, packet: Packet) -> Packet {
        if matches!(packet, Packet::End) {
            self.eos = true;
        }
        packet
    }
}
