//! Virtual logic analyzer
//!
//! Generates logic samples from a pattern without any hardware. Handy for exercising
//! encoders and consumers end to end.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::acquisition::{Acquisition, AcquisitionControl, ChunkReader, SampleBudget};
use super::capability::{Capability, ConfigKey, apply_probe_settings, ensure_supported, validate};
use super::{DevicePlugin, DeviceStatus, Probe, ProbeKind};
use crate::runtime::{
    Header, LogicPayload, Packet, Readiness, SampleBuffer, SampleWidth, Session, SourceId,
};
use crate::{Error, Result};

const MAX_PROBES: usize = 32;
const DEFAULT_SAMPLERATE: u64 = 1_000_000;
const DEFAULT_MAX_CHUNK: usize = 4096;

const ALL_CAPABILITIES: &[ConfigKey] = &[
    ConfigKey::SampleRate,
    ConfigKey::LimitSamples,
    ConfigKey::Continuous,
    ConfigKey::ProbeConfig,
];

/// Sample words a [`DemoDevice`] produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemoPattern {
    /// Sample `n` is `n`, truncated to the sample width
    Counter,
    /// Cycles through the given words
    Sequence(Vec<u32>),
}

impl DemoPattern {
    fn word(&self, position: u64) -> u32 {
        match self {
            DemoPattern::Counter => position as u32,
            DemoPattern::Sequence(words) if words.is_empty() => 0,
            DemoPattern::Sequence(words) => words[(position % words.len() as u64) as usize],
        }
    }
}

pub struct DemoDevice {
    name: String,
    probes: Vec<Probe>,
    width: SampleWidth,
    capabilities: Vec<ConfigKey>,
    status: DeviceStatus,
    samplerate: u64,
    limit_samples: Option<u64>,
    continuous: bool,
    pattern: DemoPattern,
    max_chunk: usize,
    control: Option<AcquisitionControl>,
}

impl DemoDevice {
    /// Demo device with `num_probes` logic probes named D0, D1, ...
    ///
    /// The probe count is clamped to 1..=32; the sample width is the smallest that
    /// holds one bit per probe.
    pub fn new(num_probes: usize) -> Self {
        let count = num_probes.clamp(1, MAX_PROBES);
        if count != num_probes {
            warn!("demo: {} probes requested, using {}", num_probes, count);
        }
        Self {
            name: "demo".to_string(),
            probes: (0..count)
                .map(|i| Probe::new(i, format!("D{}", i), ProbeKind::Logic))
                .collect(),
            width: SampleWidth::for_probes(count).unwrap_or(SampleWidth::U32),
            capabilities: ALL_CAPABILITIES.to_vec(),
            status: DeviceStatus::Inactive,
            samplerate: DEFAULT_SAMPLERATE,
            limit_samples: None,
            continuous: false,
            pattern: DemoPattern::Counter,
            max_chunk: DEFAULT_MAX_CHUNK,
            control: None,
        }
    }

    pub fn with_pattern(mut self, pattern: DemoPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Most samples per packet
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Advertise only the given configuration keys
    pub fn with_capabilities(mut self, keys: &[ConfigKey]) -> Self {
        self.capabilities = keys.to_vec();
        self
    }

    /// Override the sample width, e.g. to emulate hardware with a wider bus
    pub fn with_sample_width(mut self, width: SampleWidth) -> Self {
        if width.bits() >= self.probes.len() {
            self.width = width;
        } else {
            warn!(
                "demo: width of {} bits cannot hold {} probes",
                width.bits(),
                self.probes.len()
            );
        }
        self
    }
}

impl DevicePlugin for DemoDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn long_name(&self) -> &str {
        "Demo pattern generator"
    }

    fn capabilities(&self) -> &[ConfigKey] {
        &self.capabilities
    }

    fn probes(&self) -> &[Probe] {
        &self.probes
    }

    fn status(&self) -> DeviceStatus {
        self.status
    }

    fn current_samplerate(&self) -> Option<u64> {
        Some(self.samplerate)
    }

    fn limit_samples(&self) -> Option<u64> {
        self.limit_samples
    }

    fn sample_width(&self) -> Option<SampleWidth> {
        Some(self.width)
    }

    fn open(&mut self) -> Result<()> {
        self.status = DeviceStatus::Active;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.status = DeviceStatus::Inactive;
        self.control = None;
        Ok(())
    }

    fn set_capability(&mut self, capability: Capability) -> Result<()> {
        ensure_supported(&self.name, &self.capabilities, capability.key())?;
        validate(&capability, &self.probes)?;
        match capability {
            Capability::SampleRate(rate) => self.samplerate = rate,
            Capability::LimitSamples(limit) => self.limit_samples = Some(limit),
            Capability::Continuous(on) => self.continuous = on,
            Capability::ProbeConfig(settings) => apply_probe_settings(&mut self.probes, &settings),
        }
        Ok(())
    }

    fn start_acquisition(&mut self, session: &mut Session) -> Result<SourceId> {
        if self.status != DeviceStatus::Active {
            return Err(Error::Device("demo device is not open".to_string()));
        }
        AcquisitionControl::ensure_idle(self.control.as_ref(), &self.name)?;
        let budget = match (self.continuous, self.limit_samples) {
            (true, _) => SampleBudget::Continuous,
            (false, Some(limit)) => SampleBudget::Limited(limit),
            (false, None) => {
                return Err(Error::Arg(
                    "sample limit required unless continuous mode is on".to_string(),
                ));
            }
        };

        session.bus_mut().publish(Packet::Header(Header::new(
            self.samplerate,
            self.probes.len(),
            0,
        )));

        let reader = PatternReader {
            pattern: self.pattern.clone(),
            width: self.width,
            position: 0,
        };
        let acquisition = Acquisition::new(self.name.clone(), reader, budget, self.max_chunk);
        self.control = Some(acquisition.control());
        let id = session.add_source(
            self.name.clone(),
            Readiness::Timer,
            Duration::ZERO,
            acquisition.into_callback(),
        );
        info!(
            "[{}] Generating {:?} at {} Hz, {} probes",
            self.name,
            budget,
            self.samplerate,
            self.probes.len()
        );
        Ok(id)
    }

    fn stop_acquisition(&mut self, _session: &mut Session) {
        if let Some(control) = &self.control
            && !control.is_finished()
        {
            debug!("[{}] Stop requested", self.name);
            control.request_stop();
        }
    }
}

struct PatternReader {
    pattern: DemoPattern,
    width: SampleWidth,
    position: u64,
}

impl ChunkReader for PatternReader {
    fn read_chunk(&mut self, max_samples: usize) -> Result<Packet> {
        let unit = self.width.bytes();
        let mut data = Vec::new();
        data.try_reserve_exact(max_samples * unit).map_err(|e| {
            error!("demo: sample buffer allocation failed: {}", e);
            Error::Malloc(format!("{} samples: {}", max_samples, e))
        })?;
        for _ in 0..max_samples {
            let word = self.pattern.word(self.position);
            data.extend_from_slice(&word.to_le_bytes()[..unit]);
            self.position += 1;
        }
        Ok(Packet::Logic(LogicPayload::new(SampleBuffer::from_bytes(
            self.width, data,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProbeSetting;
    use crate::runtime::{ChannelSink, PacketKind};

    fn capture(mut device: DemoDevice) -> Vec<Packet> {
        let mut session = Session::new();
        let (sink, mut receiver) = ChannelSink::bounded(1024);
        session.bus_mut().subscribe(sink);
        device.open().unwrap();
        device.start_acquisition(&mut session).unwrap();
        session.run().unwrap();
        receiver.collect_until_end()
    }

    fn samples(packets: &[Packet]) -> Vec<u32> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::Logic(payload) => Some(payload.buffer.samples().collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_width_follows_probe_count() {
        assert_eq!(DemoDevice::new(8).sample_width(), Some(SampleWidth::U8));
        assert_eq!(DemoDevice::new(9).sample_width(), Some(SampleWidth::U16));
        assert_eq!(DemoDevice::new(32).sample_width(), Some(SampleWidth::U32));
        assert_eq!(DemoDevice::new(100).probes().len(), 32);
        assert_eq!(DemoDevice::new(0).probes().len(), 1);
    }

    #[test]
    fn test_counter_pattern() {
        let mut device = DemoDevice::new(8).with_max_chunk(100);
        device.set_capability(Capability::LimitSamples(300)).unwrap();
        let packets = capture(device);

        let Packet::Header(header) = &packets[0] else {
            panic!("Expected header first");
        };
        assert_eq!(header.num_logic_probes, 8);
        assert_eq!(header.samplerate, DEFAULT_SAMPLERATE);

        let words = samples(&packets);
        assert_eq!(words.len(), 300);
        assert_eq!(words[255], 255);
        assert_eq!(words[256], 0);
    }

    #[test]
    fn test_sequence_pattern_cycles() {
        let mut device = DemoDevice::new(2)
            .with_sample_width(SampleWidth::U16)
            .with_pattern(DemoPattern::Sequence(vec![1, 2, 3]))
            .with_max_chunk(2);
        device.set_capability(Capability::SampleRate(1000)).unwrap();
        device.set_capability(Capability::LimitSamples(5)).unwrap();
        let packets = capture(device);

        assert_eq!(samples(&packets), vec![1, 2, 3, 1, 2]);
        assert!(packets.iter().all(|p| match p {
            Packet::Logic(payload) => payload.unit_size() == 2,
            _ => true,
        }));
        assert_eq!(packets.last().map(|p| p.kind()), Some(PacketKind::End));
    }

    #[test]
    fn test_narrow_width_override_ignored() {
        let device = DemoDevice::new(12).with_sample_width(SampleWidth::U8);
        assert_eq!(device.sample_width(), Some(SampleWidth::U16));
    }

    #[test]
    fn test_probe_config() {
        let mut device = DemoDevice::new(4);
        device
            .set_capability(Capability::ProbeConfig(vec![
                ProbeSetting::enable(3, false),
                ProbeSetting::rename(0, "CLK"),
            ]))
            .unwrap();
        assert!(!device.probes()[3].enabled);
        assert_eq!(device.probes()[0].name, "CLK");
        assert!(matches!(
            device.set_capability(Capability::ProbeConfig(vec![ProbeSetting::enable(4, true)])),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_second_start_refused_while_generating() {
        let mut device = DemoDevice::new(4).with_max_chunk(2);
        device.set_capability(Capability::LimitSamples(4)).unwrap();
        device.open().unwrap();

        let mut session = Session::new();
        let (sink, mut receiver) = ChannelSink::bounded(64);
        session.bus_mut().subscribe(sink);
        device.start_acquisition(&mut session).unwrap();
        assert!(matches!(
            device.start_acquisition(&mut session),
            Err(Error::DeviceBusy(_))
        ));
        session.run().unwrap();

        let packets = receiver.collect_until_end();
        let kinds: Vec<(PacketKind, usize)> =
            packets.iter().map(|p| (p.kind(), p.sample_count())).collect();
        assert_eq!(
            kinds,
            vec![
                (PacketKind::Header, 0),
                (PacketKind::Logic, 2),
                (PacketKind::Logic, 2),
                (PacketKind::End, 0),
            ]
        );

        // The budget is spent, so a new run is allowed
        assert!(device.start_acquisition(&mut session).is_ok());
    }

    #[test]
    fn test_stop_continuous_generation() {
        let mut device = DemoDevice::new(8).with_max_chunk(16);
        device.set_capability(Capability::Continuous(true)).unwrap();
        device.open().unwrap();

        let mut session = Session::new();
        let (sink, mut receiver) = ChannelSink::bounded(1024);
        session.bus_mut().subscribe(sink);
        device.start_acquisition(&mut session).unwrap();
        session.iteration();
        session.iteration();
        device.stop_acquisition(&mut session);
        session.run().unwrap();

        // Stopping again after the feed ended is harmless
        device.stop_acquisition(&mut session);

        let packets = receiver.collect_until_end();
        assert_eq!(samples(&packets).len(), 32);
        assert_eq!(packets.last().map(|p| p.kind()), Some(PacketKind::End));
    }
}
