//! DSLogic capture file driver
//!
//! Provides `DslFileDevice` - a device plugin that replays a DSLogic .dsl capture file
//! as LOGIC packets.
//!
//! A .dsl file is a ZIP archive with a text `header` entry and one packed-bit block
//! per probe and block number (`L-<probe>/<block>`, LSB first). The reader multiplexes
//! the first `num_channels` probes into one sample word per position, loading blocks
//! on demand and dropping them once the read position has moved past.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use zip::ZipArchive;

use super::acquisition::{Acquisition, AcquisitionControl, ChunkReader, SampleBudget};
use super::capability::{Capability, ConfigKey, apply_probe_settings, ensure_supported, validate};
use super::{DevicePlugin, DeviceStatus, Probe, ProbeKind};
use crate::runtime::{
    Header, LogicPayload, Packet, Readiness, SampleBuffer, SampleWidth, Session, SourceId,
};
use crate::{Error, Result};

const CAPABILITIES: &[ConfigKey] = &[ConfigKey::LimitSamples, ConfigKey::ProbeConfig];
const DEFAULT_MAX_CHUNK: usize = 4096;

/// Header information from a DSL file
#[derive(Debug, Clone)]
pub struct DslHeader {
    /// Total number of probes/channels
    pub total_probes: usize,
    /// Sample rate as a string (e.g., "50 MHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: f64,
    /// Sample period in seconds (1 / sample_rate)
    pub sample_period: f64,
    /// Total number of samples captured
    pub total_samples: u64,
    /// Total number of data blocks
    pub total_blocks: u64,
    /// Samples per block (calculated)
    pub samples_per_block: u64,
    /// Probe names indexed by probe number (0-based)
    pub probe_names: Vec<String>,
}

type SharedArchive = Arc<Mutex<ZipArchive<File>>>;

/// Device that replays a DSLogic .dsl capture file
///
/// Registering the device does no I/O; `open()` reads and checks the file header.
/// The sample rate comes from the file, so only `LimitSamples` and `ProbeConfig`
/// are configurable.
///
/// # Example
/// ```ignore
/// let mut registry = DeviceRegistry::new();
/// let id = registry.register(DslFileDevice::new("capture.dsl", 16)?);
/// registry.open(id)?;
/// ```
pub struct DslFileDevice {
    name: String,
    path: PathBuf,
    num_channels: usize,
    archive: Option<SharedArchive>,
    header: Option<DslHeader>,
    probes: Vec<Probe>,
    limit_samples: Option<u64>,
    max_chunk: usize,
    control: Option<AcquisitionControl>,
}

impl DslFileDevice {
    /// Create a device for the file at `path`, replaying its first `num_channels` probes
    pub fn new<P: AsRef<Path>>(path: P, num_channels: usize) -> Result<Self> {
        if !(1..=32).contains(&num_channels) {
            return Err(Error::Arg(format!(
                "num_channels must be 1-32, got {}",
                num_channels
            )));
        }

        Ok(Self {
            name: "dsl_file".to_string(),
            path: path.as_ref().to_path_buf(),
            num_channels,
            archive: None,
            header: None,
            probes: (0..num_channels)
                .map(|i| Probe::new(i, format!("Probe{}", i), ProbeKind::Logic))
                .collect(),
            limit_samples: None,
            max_chunk: DEFAULT_MAX_CHUNK,
            control: None,
        })
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Most samples per packet
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Parsed file header, available once the device is open
    pub fn header(&self) -> Option<&DslHeader> {
        self.header.as_ref()
    }

    /// Get the number of channels this device replays
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Get the total capture duration in seconds
    pub fn capture_duration(&self) -> Option<f64> {
        self.header
            .as_ref()
            .map(|h| h.total_samples as f64 * h.sample_period)
    }

    fn parse_header(archive: &mut ZipArchive<File>) -> Result<DslHeader> {
        let mut header_file = archive
            .by_name("header")
            .map_err(|e| Error::ParseHeader(format!("Cannot find header file: {}", e)))?;

        let mut header_content = String::new();
        header_file.read_to_string(&mut header_content)?;
        drop(header_file);

        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut total_blocks: Option<u64> = None;
        let mut probe_names_map: HashMap<usize, String> = HashMap::new();

        for line in header_content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(value) = line.strip_prefix("total probes = ") {
                total_probes = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("total blocks = ") {
                total_blocks = value.parse().ok();
            } else if line.starts_with("probe")
                && let Some((probe_part, name)) = line.split_once(" = ")
                && let Some(num_str) = probe_part.strip_prefix("probe")
                && let Ok(probe_num) = num_str.parse::<usize>()
            {
                probe_names_map.insert(probe_num, name.to_string());
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| Error::MissingField("total probes".to_string()))?;
        let samplerate = samplerate.ok_or_else(|| Error::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| Error::MissingField("total samples".to_string()))?;
        let total_blocks =
            total_blocks.ok_or_else(|| Error::MissingField("total blocks".to_string()))?;

        let samplerate_hz = Self::parse_sample_rate(&samplerate)
            .ok_or_else(|| Error::ParseHeader(format!("Invalid sample rate: {}", samplerate)))?;
        let sample_period = 1.0 / samplerate_hz;

        // Blocks are fixed-size except the last one, so the first block gives the size
        let samples_per_block = {
            let mut file = archive
                .by_name("L-0/0")
                .map_err(|_| Error::ParseHeader("Could not read first block".to_string()))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|_| Error::ParseHeader("Could not read first block data".to_string()))?;
            (buf.len() * 8) as u64
        };
        if samples_per_block == 0 {
            return Err(Error::ParseHeader("First block is empty".to_string()));
        }

        debug!(
            "File has {} samples across {} blocks ({} samples/block standard size)",
            total_samples, total_blocks, samples_per_block
        );

        let probe_names = (0..total_probes)
            .map(|i| {
                probe_names_map
                    .get(&i)
                    .cloned()
                    .unwrap_or_else(|| format!("Probe{}", i))
            })
            .collect();

        Ok(DslHeader {
            total_probes,
            samplerate,
            samplerate_hz,
            sample_period,
            total_samples,
            total_blocks,
            samples_per_block,
            probe_names,
        })
    }

    /// Extract a single bit from a byte array at the given bit index
    #[inline]
    fn get_bit(data: &[u8], bit_index: usize) -> bool {
        let byte_index = bit_index / 8;
        let bit_offset = bit_index % 8;

        if byte_index < data.len() {
            (data[byte_index] >> bit_offset) & 1 == 1
        } else {
            false
        }
    }

    /// Parse a sample rate string (e.g., "50 MHz") into Hz
    fn parse_sample_rate(samplerate: &str) -> Option<f64> {
        let parts: Vec<&str> = samplerate.split_whitespace().collect();
        if parts.len() >= 2
            && let Ok(value) = parts[0].parse::<f64>()
        {
            let multiplier = match parts[1] {
                "GHz" => 1_000_000_000.0,
                "MHz" => 1_000_000.0,
                "KHz" | "kHz" => 1_000.0,
                "Hz" => 1.0,
                _ => return None,
            };
            return Some(value * multiplier);
        }
        None
    }
}

impl DevicePlugin for DslFileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn long_name(&self) -> &str {
        "DSLogic capture file"
    }

    fn capabilities(&self) -> &[ConfigKey] {
        CAPABILITIES
    }

    fn probes(&self) -> &[Probe] {
        &self.probes
    }

    fn status(&self) -> DeviceStatus {
        if self.archive.is_some() {
            DeviceStatus::Active
        } else {
            DeviceStatus::Inactive
        }
    }

    fn current_samplerate(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.samplerate_hz.round() as u64)
    }

    fn limit_samples(&self) -> Option<u64> {
        self.limit_samples
    }

    fn sample_width(&self) -> Option<SampleWidth> {
        SampleWidth::for_probes(self.num_channels)
    }

    fn open(&mut self) -> Result<()> {
        if self.archive.is_some() {
            return Ok(());
        }
        let file = File::open(&self.path).map_err(|e| {
            warn!("[{}] Cannot open {}: {}", self.name, self.path.display(), e);
            Error::Device(format!("{}: {}", self.path.display(), e))
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            warn!("[{}] {} is not a capture archive: {}", self.name, self.path.display(), e);
            Error::Device(format!("{}: {}", self.path.display(), e))
        })?;
        let header = Self::parse_header(&mut archive)?;

        if header.total_probes < self.num_channels {
            return Err(Error::Device(format!(
                "File has only {} channels, need at least {}",
                header.total_probes, self.num_channels
            )));
        }

        // Names from the file, unless the user already renamed a probe
        for probe in self.probes.iter_mut() {
            if probe.name == format!("Probe{}", probe.index) {
                probe.name = header.probe_names[probe.index].clone();
            }
        }

        info!(
            "[{}] Opened {} ({} samples at {})",
            self.name,
            self.path.display(),
            header.total_samples,
            header.samplerate
        );
        self.header = Some(header);
        self.archive = Some(Arc::new(Mutex::new(archive)));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.archive.take().is_some() {
            debug!("[{}] Closed {}", self.name, self.path.display());
        }
        self.control = None;
        Ok(())
    }

    fn set_capability(&mut self, capability: Capability) -> Result<()> {
        ensure_supported(&self.name, CAPABILITIES, capability.key())?;
        validate(&capability, &self.probes)?;
        match capability {
            Capability::LimitSamples(limit) => self.limit_samples = Some(limit),
            Capability::ProbeConfig(settings) => apply_probe_settings(&mut self.probes, &settings),
            _ => {}
        }
        Ok(())
    }

    fn start_acquisition(&mut self, session: &mut Session) -> Result<SourceId> {
        let (Some(archive), Some(header)) = (&self.archive, &self.header) else {
            return Err(Error::Device(format!("{} is not open", self.path.display())));
        };
        AcquisitionControl::ensure_idle(self.control.as_ref(), &self.name)?;
        let width = SampleWidth::for_probes(self.num_channels)
            .ok_or_else(|| Error::Arg(format!("{} channels", self.num_channels)))?;
        let total = self
            .limit_samples
            .unwrap_or(header.total_samples)
            .min(header.total_samples);
        let samplerate = header.samplerate_hz.round() as u64;

        session.bus_mut().publish(Packet::Header(Header::new(
            samplerate,
            self.num_channels,
            0,
        )));

        let reader = BlockReader {
            archive: Arc::clone(archive),
            samples_per_block: header.samples_per_block,
            num_channels: self.num_channels,
            width,
            position: 0,
            blocks: HashMap::new(),
        };
        let acquisition = Acquisition::new(
            self.name.clone(),
            reader,
            SampleBudget::Limited(total),
            self.max_chunk,
        );
        self.control = Some(acquisition.control());
        let id = session.add_source(
            self.name.clone(),
            Readiness::Timer,
            Duration::ZERO,
            acquisition.into_callback(),
        );
        info!(
            "[{}] Replaying {} samples at {} ({} channels)",
            self.name, total, header.samplerate, self.num_channels
        );
        Ok(id)
    }

    fn stop_acquisition(&mut self, _session: &mut Session) {
        if let Some(control) = &self.control
            && !control.is_finished()
        {
            control.request_stop();
        }
    }
}

/// Multiplexes per-probe bit blocks into sample words
struct BlockReader {
    archive: SharedArchive,
    samples_per_block: u64,
    num_channels: usize,
    width: SampleWidth,
    position: u64,
    blocks: HashMap<(usize, u64), Arc<[u8]>>,
}

impl BlockReader {
    fn block(&mut self, channel: usize, block_num: u64) -> Result<Arc<[u8]>> {
        if let Some(data) = self.blocks.get(&(channel, block_num)) {
            return Ok(Arc::clone(data));
        }

        let block_name = format!("L-{}/{}", channel, block_num);
        let data = {
            let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
            let mut file = archive
                .by_name(&block_name)
                .map_err(|_| Error::Read(format!("block {} not found", block_name)))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            Arc::<[u8]>::from(data)
        };
        trace!("Loaded block {} ({} bytes)", block_name, data.len());

        // Blocks behind the read position are never needed again
        self.blocks.retain(|&(_, b), _| b >= block_num);
        self.blocks.insert((channel, block_num), Arc::clone(&data));
        Ok(data)
    }
}

impl ChunkReader for BlockReader {
    fn read_chunk(&mut self, max_samples: usize) -> Result<Packet> {
        let unit = self.width.bytes();
        let mut data = Vec::new();
        data.try_reserve_exact(max_samples * unit).map_err(|e| {
            error!("dsl_file: sample buffer allocation failed: {}", e);
            Error::Malloc(format!("{} samples: {}", max_samples, e))
        })?;

        let mut produced = 0;
        while produced < max_samples {
            let block_num = self.position / self.samples_per_block;
            let start = (self.position % self.samples_per_block) as usize;
            let n = (self.samples_per_block as usize - start).min(max_samples - produced);

            let mut words = vec![0u32; n];
            for channel in 0..self.num_channels {
                let block = self.block(channel, block_num)?;
                for (i, word) in words.iter_mut().enumerate() {
                    if DslFileDevice::get_bit(&block, start + i) {
                        *word |= 1 << channel;
                    }
                }
            }
            for word in words {
                data.extend_from_slice(&word.to_le_bytes()[..unit]);
            }
            produced += n;
            self.position += n as u64;
        }

        Ok(Packet::Logic(LogicPayload::new(SampleBuffer::from_bytes(
            self.width, data,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ChannelSink, PacketKind};
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zip::write::SimpleFileOptions;

    /// Three probes, 20 samples in blocks of 8 samples (one byte per block)
    fn fixture() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = SimpleFileOptions::default();

        writer.start_file("header", options).unwrap();
        writer
            .write_all(
                b"[version]\nversion = 2\n[header]\ntotal probes = 3\nsamplerate = 1 kHz\n\
                  total samples = 20\ntotal blocks = 3\nprobe0 = CLK\nprobe1 = DATA\n",
            )
            .unwrap();

        let blocks: [[u8; 3]; 3] = [[0x55, 0x55, 0x55], [0xff, 0x00, 0x0f], [0, 0, 0]];
        for (probe, probe_blocks) in blocks.iter().enumerate() {
            for (block, byte) in probe_blocks.iter().enumerate() {
                writer
                    .start_file(format!("L-{}/{}", probe, block), options)
                    .unwrap();
                writer.write_all(&[*byte]).unwrap();
            }
        }
        writer.finish().unwrap();
        file
    }

    fn expected_word(i: u32) -> u32 {
        let clk = (i % 2 == 0) as u32;
        let data = if (8..16).contains(&i) { 0 } else { 2 };
        clk | data
    }

    fn replay(mut device: DslFileDevice) -> Vec<Packet> {
        let mut session = Session::new();
        let (sink, mut receiver) = ChannelSink::bounded(256);
        session.bus_mut().subscribe(sink);
        device.open().unwrap();
        device.start_acquisition(&mut session).unwrap();
        session.run().unwrap();
        receiver.collect_until_end()
    }

    fn words(packets: &[Packet]) -> Vec<u32> {
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
    fn test_parse_sample_rate_valid() {
        assert_eq!(DslFileDevice::parse_sample_rate("50 MHz"), Some(50_000_000.0));
        assert_eq!(DslFileDevice::parse_sample_rate("1 GHz"), Some(1_000_000_000.0));
        assert_eq!(DslFileDevice::parse_sample_rate("100 kHz"), Some(100_000.0));
        assert_eq!(DslFileDevice::parse_sample_rate("100 KHz"), Some(100_000.0));
        assert_eq!(DslFileDevice::parse_sample_rate("2.5 MHz"), Some(2_500_000.0));
    }

    #[test]
    fn test_parse_sample_rate_invalid() {
        assert_eq!(DslFileDevice::parse_sample_rate("invalid"), None);
        assert_eq!(DslFileDevice::parse_sample_rate("50"), None);
        assert_eq!(DslFileDevice::parse_sample_rate("50 mhz"), None);
        assert_eq!(DslFileDevice::parse_sample_rate(""), None);
    }

    #[test]
    fn test_get_bit() {
        let data = vec![0b10101010, 0b11001100];
        assert!(!DslFileDevice::get_bit(&data, 0));
        assert!(DslFileDevice::get_bit(&data, 1));
        assert!(DslFileDevice::get_bit(&data, 7));
        assert!(!DslFileDevice::get_bit(&data, 8));
        assert!(DslFileDevice::get_bit(&data, 10));
        assert!(!DslFileDevice::get_bit(&data, 16));
    }

    #[test]
    fn test_invalid_channel_count() {
        assert!(matches!(DslFileDevice::new("x.dsl", 0), Err(Error::Arg(_))));
        assert!(matches!(DslFileDevice::new("x.dsl", 33), Err(Error::Arg(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let mut device = DslFileDevice::new("/nonexistent/capture.dsl", 2).unwrap();
        assert!(matches!(device.open(), Err(Error::Device(_))));
        assert_eq!(device.status(), DeviceStatus::Inactive);
    }

    #[test]
    fn test_open_rejects_non_archive() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not a zip file").unwrap();
        let mut device = DslFileDevice::new(file.path(), 2).unwrap();
        assert!(matches!(device.open(), Err(Error::Device(_))));
        assert_eq!(device.status(), DeviceStatus::Inactive);
    }

    #[test]
    fn test_open_reads_header() {
        let file = fixture();
        let mut device = DslFileDevice::new(file.path(), 3).unwrap();
        assert_eq!(device.current_samplerate(), None);
        device.open().unwrap();

        let header = device.header().unwrap();
        assert_eq!(header.total_probes, 3);
        assert_eq!(header.total_samples, 20);
        assert_eq!(header.samples_per_block, 8);
        assert_eq!(device.current_samplerate(), Some(1000));
        assert_eq!(device.probes()[0].name, "CLK");
        assert_eq!(device.probes()[1].name, "DATA");
        assert_eq!(device.probes()[2].name, "Probe2");
        assert_eq!(device.status(), DeviceStatus::Active);
    }

    #[test]
    fn test_more_channels_than_file() {
        let file = fixture();
        let mut device = DslFileDevice::new(file.path(), 4).unwrap();
        assert!(matches!(device.open(), Err(Error::Device(_))));
    }

    #[test]
    fn test_replay_multiplexes_probes() {
        let file = fixture();
        let device = DslFileDevice::new(file.path(), 3).unwrap().with_max_chunk(6);
        let packets = replay(device);

        let expected: Vec<u32> = (0..20).map(expected_word).collect();
        assert_eq!(words(&packets), expected);
        assert_eq!(packets.iter().filter(|p| p.is_samples()).count(), 4);
        assert_eq!(packets.last().map(|p| p.kind()), Some(PacketKind::End));
    }

    #[test]
    fn test_limit_samples_caps_replay() {
        let file = fixture();
        let mut device = DslFileDevice::new(file.path(), 2).unwrap().with_max_chunk(3);
        device.set_capability(Capability::LimitSamples(10)).unwrap();
        let packets = replay(device);

        let expected: Vec<u32> = (0..10).map(expected_word).collect();
        assert_eq!(words(&packets), expected);
        assert_eq!(packets.iter().filter(|p| p.is_samples()).count(), 4);
    }

    #[test]
    fn test_second_start_refused_while_replaying() {
        let file = fixture();
        let mut device = DslFileDevice::new(file.path(), 3).unwrap().with_max_chunk(8);
        device.open().unwrap();

        let mut session = Session::new();
        let (sink, mut receiver) = ChannelSink::bounded(256);
        session.bus_mut().subscribe(sink);
        device.start_acquisition(&mut session).unwrap();
        assert!(matches!(
            device.start_acquisition(&mut session),
            Err(Error::DeviceBusy(_))
        ));
        assert_eq!(session.num_sources(), 1);
        session.run().unwrap();

        let packets = receiver.collect_until_end();
        assert_eq!(packets.iter().filter(|p| p.kind() == PacketKind::Header).count(), 1);
        assert_eq!(words(&packets).len(), 20);

        // A finished replay can be started again
        assert!(device.start_acquisition(&mut session).is_ok());
    }

    #[test]
    fn test_samplerate_not_configurable() {
        let file = fixture();
        let mut device = DslFileDevice::new(file.path(), 2).unwrap();
        assert!(matches!(
            device.set_capability(Capability::SampleRate(1)),
            Err(Error::Unsupported { key: ConfigKey::SampleRate, .. })
        ));
    }
}
