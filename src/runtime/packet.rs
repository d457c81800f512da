//! Data feed packets carried by the packet bus

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use super::sample::{AnalogValue, SampleBuffer, SampleWidth};

/// Current data feed format version
pub const FEED_VERSION: u32 = 1;

/// Protocol carried by a feed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolId {
    /// Unprocessed samples straight from the source
    Raw,
}

/// Stream metadata, always the first packet of a feed
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub feed_version: u32,
    pub start_time: SystemTime,
    /// Achieved sample rate in Hz (may differ from the requested one)
    pub samplerate: u64,
    pub num_logic_probes: usize,
    pub num_analog_probes: usize,
    pub protocol: ProtocolId,
}

impl Header {
    /// Header stamped with the current time
    pub fn new(samplerate: u64, num_logic_probes: usize, num_analog_probes: usize) -> Self {
        Self {
            feed_version: FEED_VERSION,
            start_time: SystemTime::now(),
            samplerate,
            num_logic_probes,
            num_analog_probes,
            protocol: ProtocolId::Raw,
        }
    }
}

/// Multiplexed logic samples, one bit per probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicPayload {
    pub buffer: SampleBuffer,
}

impl LogicPayload {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self { buffer }
    }

    pub fn unit_size(&self) -> usize {
        self.buffer.width().bytes()
    }

    pub fn width(&self) -> SampleWidth {
        self.buffer.width()
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }
}

/// Analog records: `num_probes` readings per sample, stored sample-major
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalogPayload {
    num_probes: usize,
    values: Arc<[AnalogValue]>,
}

impl AnalogPayload {
    /// Build a payload. Trailing values short of a full record are not addressable.
    pub fn new(num_probes: usize, values: impl Into<Arc<[AnalogValue]>>) -> Self {
        Self {
            num_probes: num_probes.max(1),
            values: values.into(),
        }
    }

    pub fn num_probes(&self) -> usize {
        self.num_probes
    }

    pub fn sample_count(&self) -> usize {
        self.values.len() / self.num_probes
    }

    /// Per-probe readings of one sample record
    pub fn record(&self, index: usize) -> Option<&[AnalogValue]> {
        let start = index.checked_mul(self.num_probes)?;
        self.values.get(start..start + self.num_probes)
    }

    pub fn records(&self) -> impl Iterator<Item = &[AnalogValue]> {
        self.values.chunks_exact(self.num_probes)
    }
}

/// Packet kind tag, used for filtering and feed-order checks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Header,
    Logic,
    Analog,
    Trigger,
    End,
}

/// One unit of the acquisition-to-consumer data feed
///
/// Packets are immutable once built; sample storage is shared, so cloning a packet
/// for another subscriber never copies sample data.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Header(Header),
    Logic(LogicPayload),
    Analog(AnalogPayload),
    Trigger,
    End,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Header(_) => PacketKind::Header,
            Packet::Logic(_) => PacketKind::Logic,
            Packet::Analog(_) => PacketKind::Analog,
            Packet::Trigger => PacketKind::Trigger,
            Packet::End => PacketKind::End,
        }
    }

    /// Number of sample records carried (0 for non-sample packets)
    pub fn sample_count(&self) -> usize {
        match self {
            Packet::Logic(payload) => payload.sample_count(),
            Packet::Analog(payload) => payload.sample_count(),
            _ => 0,
        }
    }

    pub fn is_samples(&self) -> bool {
        matches!(self, Packet::Logic(_) | Packet::Analog(_))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Packet::Header(header) => write!(
                f,
                "Header[rate={}, logic={}, analog={}]",
                header.samplerate, header.num_logic_probes, header.num_analog_probes
            ),
            Packet::Logic(payload) => write!(f, "Logic[{}]", payload.buffer),
            Packet::Analog(payload) => write!(
                f,
                "Analog[probes={}, samples={}]",
                payload.num_probes(),
                payload.sample_count()
            ),
            Packet::Trigger => write!(f, "Trigger"),
            Packet::End => write!(f, "End"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_records() {
        let values: Vec<AnalogValue> = (0..6).map(|v| AnalogValue::new(v, 16)).collect();
        let payload = AnalogPayload::new(2, values);
        assert_eq!(payload.sample_count(), 3);
        assert_eq!(payload.record(1).map(|r| r[0].value), Some(2));
        assert_eq!(payload.record(1).map(|r| r[1].value), Some(3));
        assert!(payload.record(3).is_none());
        assert_eq!(payload.records().count(), 3);
    }

    #[test]
    fn test_packet_sample_count() {
        let logic = Packet::Logic(LogicPayload::new(SampleBuffer::from_samples(
            SampleWidth::U16,
            &[1, 2, 3],
        )));
        assert_eq!(logic.sample_count(), 3);
        assert_eq!(logic.kind(), PacketKind::Logic);
        assert!(logic.is_samples());
        assert_eq!(Packet::End.sample_count(), 0);
        assert!(!Packet::Trigger.is_samples());
    }

    #[test]
    fn test_header_defaults() {
        let header = Header::new(48_000, 0, 2);
        assert_eq!(header.feed_version, FEED_VERSION);
        assert_eq!(header.protocol, ProtocolId::Raw);
        assert_eq!(header.num_analog_probes, 2);
    }
}
