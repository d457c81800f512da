//! Sound card capture driver
//!
//! Captures two channels of signed 16-bit audio through a [`CaptureSource`] and
//! publishes them as ANALOG packets, one record per frame. Stream parameters are
//! negotiated when the acquisition starts, so the achieved rate may differ from the
//! requested one; the header and `current_samplerate()` report the achieved value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::acquisition::{Acquisition, AcquisitionControl, ChunkReader, SampleBudget};
use super::capability::{Capability, ConfigKey, apply_probe_settings, ensure_supported, validate};
use super::source::{AccessMode, CaptureSource, FrameFormat, SourceError};
use super::{DevicePlugin, DeviceStatus, Probe, ProbeKind};
use crate::runtime::{AnalogPayload, AnalogValue, Header, Packet, Session, SourceId};
use crate::{Error, Result};

pub const DEFAULT_DEVICE: &str = "plughw:0,0";

const NUM_PROBES: usize = 2;
const SAMPLE_BITS: u8 = 16;
/// Size of the per-read capture buffer in bytes
const READ_BUFFER_BYTES: usize = 4096;
const FRAME_BYTES: usize = NUM_PROBES * 2;
const MAX_FRAMES_PER_READ: usize = READ_BUFFER_BYTES / FRAME_BYTES;
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

const CAPABILITIES: &[ConfigKey] = &[
    ConfigKey::SampleRate,
    ConfigKey::LimitSamples,
    ConfigKey::Continuous,
    ConfigKey::ProbeConfig,
];

fn lock<S>(source: &Mutex<S>) -> MutexGuard<'_, S> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AudioDevice<S: CaptureSource> {
    name: String,
    device: String,
    source: Arc<Mutex<S>>,
    probes: Vec<Probe>,
    status: DeviceStatus,
    cur_rate: Option<u64>,
    limit_samples: Option<u64>,
    continuous: bool,
    poll_timeout: Duration,
    control: Option<AcquisitionControl>,
}

impl<S: CaptureSource + 'static> AudioDevice<S> {
    pub fn new(source: S) -> Self {
        Self {
            name: "alsa".to_string(),
            device: DEFAULT_DEVICE.to_string(),
            source: Arc::new(Mutex::new(source)),
            probes: vec![
                Probe::new(0, "left", ProbeKind::Analog),
                Probe::new(1, "right", ProbeKind::Analog),
            ],
            status: DeviceStatus::Inactive,
            cur_rate: None,
            limit_samples: None,
            continuous: false,
            poll_timeout: POLL_TIMEOUT,
            control: None,
        }
    }

    /// Capture device to open instead of the default one
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// How long the session waits for the source before forcing a read
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Shared handle to the underlying source
    pub fn source(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.source)
    }

    fn negotiate(&self, source: &mut S) -> Result<u32> {
        let failed = |what: &str, e: SourceError| {
            warn!("[{}] cannot set {} ({})", self.name, what, e);
            Error::Device(format!("cannot set {}: {}", what, e))
        };

        let requested = match self.cur_rate {
            Some(rate) => u32::try_from(rate).unwrap_or(u32::MAX),
            None => source
                .default_params()
                .map_err(|e| failed("default parameters", e))?
                .rate,
        };

        source
            .set_access(AccessMode::Interleaved)
            .map_err(|e| failed("access type", e))?;
        source
            .set_format(FrameFormat::S16Le)
            .map_err(|e| failed("sample format", e))?;
        let achieved = source
            .set_rate_near(requested)
            .map_err(|e| failed("sample rate", e))?;
        source
            .set_channels(NUM_PROBES as u16)
            .map_err(|e| failed("channel count", e))?;
        source.apply_params().map_err(|e| failed("parameters", e))?;
        source.prepare().map_err(|e| {
            warn!("[{}] cannot prepare audio interface for use ({})", self.name, e);
            Error::Device(format!("cannot prepare audio interface: {}", e))
        })?;

        if achieved != requested {
            info!(
                "[{}] Requested {} Hz, device runs at {} Hz",
                self.name, requested, achieved
            );
        }
        Ok(achieved)
    }
}

impl<S: CaptureSource + 'static> DevicePlugin for AudioDevice<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn long_name(&self) -> &str {
        "ALSA capture driver"
    }

    fn capabilities(&self) -> &[ConfigKey] {
        CAPABILITIES
    }

    fn probes(&self) -> &[Probe] {
        &self.probes
    }

    fn status(&self) -> DeviceStatus {
        self.status
    }

    fn current_samplerate(&self) -> Option<u64> {
        self.cur_rate
    }

    fn limit_samples(&self) -> Option<u64> {
        self.limit_samples
    }

    fn open(&mut self) -> Result<()> {
        if self.status == DeviceStatus::Active {
            return Ok(());
        }
        let mut source = lock(&self.source);
        if let Err(e) = source.open(&self.device) {
            warn!("[{}] cannot open audio device {} ({})", self.name, self.device, e);
            return Err(match e {
                SourceError::Busy(device) => Error::DeviceBusy(device),
                other => Error::Device(format!("cannot open {}: {}", self.device, other)),
            });
        }
        if let Err(e) = source.default_params() {
            warn!(
                "[{}] cannot initialize hardware parameter structure ({})",
                self.name, e
            );
            source.close();
            return Err(Error::Device(format!(
                "cannot initialize hardware parameters: {}",
                e
            )));
        }
        drop(source);

        self.status = DeviceStatus::Active;
        info!("[{}] Opened {}", self.name, self.device);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.status == DeviceStatus::Inactive {
            return Ok(());
        }
        lock(&self.source).close();
        self.status = DeviceStatus::Inactive;
        self.control = None;
        debug!("[{}] Closed {}", self.name, self.device);
        Ok(())
    }

    fn set_capability(&mut self, capability: Capability) -> Result<()> {
        ensure_supported(&self.name, CAPABILITIES, capability.key())?;
        validate(&capability, &self.probes)?;
        match capability {
            Capability::SampleRate(rate) => self.cur_rate = Some(rate),
            Capability::LimitSamples(limit) => self.limit_samples = Some(limit),
            Capability::Continuous(on) => self.continuous = on,
            Capability::ProbeConfig(settings) => apply_probe_settings(&mut self.probes, &settings),
        }
        Ok(())
    }

    fn start_acquisition(&mut self, session: &mut Session) -> Result<SourceId> {
        if self.status != DeviceStatus::Active {
            return Err(Error::Device(format!("{} is not open", self.device)));
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

        let (achieved, readiness) = {
            let mut source = lock(&self.source);
            let achieved = self.negotiate(&mut source)?;
            (achieved, source.readiness())
        };
        self.cur_rate = Some(achieved as u64);

        session
            .bus_mut()
            .publish(Packet::Header(Header::new(achieved as u64, 0, NUM_PROBES)));

        let reader = AudioReader {
            source: Arc::clone(&self.source),
            buffer: vec![0; READ_BUFFER_BYTES / 2],
        };
        let acquisition = Acquisition::new(self.name.clone(), reader, budget, MAX_FRAMES_PER_READ);
        self.control = Some(acquisition.control());
        let id = session.add_source(
            self.name.clone(),
            readiness,
            self.poll_timeout,
            acquisition.into_callback(),
        );
        info!(
            "[{}] Acquisition started at {} Hz ({:?})",
            self.name, achieved, budget
        );
        Ok(id)
    }

    fn stop_acquisition(&mut self, _session: &mut Session) {
        match &self.control {
            Some(control) if !control.is_finished() => {
                debug!("[{}] Stop requested", self.name);
                control.request_stop();
            }
            _ => debug!("[{}] No acquisition running", self.name),
        }
    }
}

/// Reads interleaved frames and turns them into analog records
struct AudioReader<S> {
    source: Arc<Mutex<S>>,
    buffer: Vec<i16>,
}

impl<S: CaptureSource> ChunkReader for AudioReader<S> {
    fn read_chunk(&mut self, max_samples: usize) -> Result<Packet> {
        let frames = max_samples.min(MAX_FRAMES_PER_READ);
        self.buffer.fill(0);
        let count = lock(&self.source)
            .read_frames(&mut self.buffer, frames)
            .map_err(|e| {
                warn!("Failed to read samples: {}", e);
                Error::Read(e.to_string())
            })?;

        let mut values = Vec::new();
        values.try_reserve_exact(count * NUM_PROBES).map_err(|e| {
            error!("Analog buffer allocation failed: {}", e);
            Error::Malloc(format!("{} analog records: {}", count, e))
        })?;
        values.extend(
            self.buffer[..count * NUM_PROBES]
                .iter()
                .map(|&raw| AnalogValue::new((raw as u16 as u32) & 0xffff, SAMPLE_BITS)),
        );
        Ok(Packet::Analog(AnalogPayload::new(NUM_PROBES, values)))
    }
}
