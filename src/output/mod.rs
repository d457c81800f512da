//! Streaming output encoders
//!
//! An output format renders the raw LOGIC sample stream as text. Each format is an
//! [`OutputFormat`] that builds a stateful [`Encoder`] from an [`OutputContext`]; the
//! encoder is then fed payload bytes in arbitrary chunks and out-of-band events.
//!
//! Encoders consume input in `unit_size` strides. A trailing remainder shorter than
//! one unit is dropped, not carried over to the next call, so callers should hand
//! over whole samples (LOGIC payloads always hold whole samples).
//!
//! Formats:
//! - `csv`: one row per sample, one column per enabled probe
//! - `ols`: OpenBench Logic Sniffer capture file
//! - `bits`: one text line per probe, grouped into blocks of N samples

pub mod bits;
pub mod csv;
pub mod ols;
pub mod registry;
pub mod sink;
pub mod util;

pub use registry::{find_format, list_formats, register_format};
pub use sink::{MemoryWriter, OutputSink};
pub use util::{period_string, samplerate_string};

use chrono::{DateTime, Local};
use tracing::{debug, error};

use crate::device::{DevicePlugin, Probe, ProbeKind};
use crate::runtime::PacketKind;
use crate::{Error, Result};

/// Most enabled probes an encoder can handle (one bit each in a 64-bit word)
pub const MAX_ENABLED_PROBES: usize = 64;

/// Out-of-band marker delivered to an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Trigger,
    /// Flush partial state and release the encoder
    End,
}

/// Everything an encoder needs to know about the acquisition
#[derive(Debug, Clone)]
pub struct OutputContext {
    /// Logic probes of the device, enabled or not
    pub probes: Vec<Probe>,
    pub samplerate: Option<u64>,
    /// Native bytes per sample; defaults to one bit per enabled probe, rounded up
    pub unit_size: Option<usize>,
    pub limit_samples: Option<u64>,
    /// Time stamped into headers
    pub timestamp: DateTime<Local>,
}

impl OutputContext {
    pub fn new(probes: Vec<Probe>) -> Self {
        Self {
            probes,
            samplerate: None,
            unit_size: None,
            limit_samples: None,
            timestamp: Local::now(),
        }
    }

    /// Context describing a device's logic probes and current configuration
    pub fn from_device(device: &dyn DevicePlugin) -> Self {
        let probes = device
            .probes()
            .iter()
            .filter(|p| p.kind == ProbeKind::Logic)
            .cloned()
            .collect();
        Self {
            probes,
            samplerate: device.current_samplerate(),
            unit_size: device.sample_width().map(|w| w.bytes()),
            limit_samples: device.limit_samples(),
            timestamp: Local::now(),
        }
    }

    pub fn with_samplerate(mut self, samplerate: u64) -> Self {
        self.samplerate = Some(samplerate);
        self
    }

    pub fn with_unit_size(mut self, unit_size: usize) -> Self {
        self.unit_size = Some(unit_size);
        self
    }

    pub fn with_limit_samples(mut self, limit: u64) -> Self {
        self.limit_samples = Some(limit);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Header timestamp in `ctime` layout, newline included
    pub fn ctime(&self) -> String {
        util::ctime(&self.timestamp)
    }

    /// Validate the probe set and work out the sample layout
    pub fn layout(&self) -> Result<ProbeLayout> {
        if self.probes.is_empty() {
            return Err(Error::Arg("no probes".to_string()));
        }
        let enabled: Vec<(usize, String)> = self
            .probes
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.index, p.name.clone()))
            .collect();
        if enabled.is_empty() {
            return Err(Error::Arg("no enabled probes".to_string()));
        }
        if enabled.len() > MAX_ENABLED_PROBES {
            return Err(Error::Arg(format!(
                "{} enabled probes, at most {} supported",
                enabled.len(),
                MAX_ENABLED_PROBES
            )));
        }

        let unit_size = self.unit_size.unwrap_or(enabled.len().div_ceil(8));
        if !(1..=8).contains(&unit_size) {
            return Err(Error::Arg(format!("unit size {} out of range", unit_size)));
        }
        if let Some((index, name)) = enabled.iter().find(|(index, _)| *index >= unit_size * 8) {
            return Err(Error::Arg(format!(
                "probe {} ({}) does not fit a {}-byte sample",
                index, name, unit_size
            )));
        }

        Ok(ProbeLayout {
            enabled,
            total: self.probes.len(),
            unit_size,
        })
    }
}

/// Enabled probes and sample width, as checked by [`OutputContext::layout`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeLayout {
    /// (bit index, name) of each enabled probe, in probe order
    pub enabled: Vec<(usize, String)>,
    pub total: usize,
    pub unit_size: usize,
}

impl ProbeLayout {
    pub fn num_enabled(&self) -> usize {
        self.enabled.len()
    }
}

/// Incremental renderer for one output stream
pub trait Encoder: Send {
    fn unit_size(&self) -> usize;

    /// Render whole samples from `input`; the first call also returns the header
    fn data(&mut self, input: &[u8]) -> Result<Vec<u8>>;

    /// Handle an out-of-band event; `End` flushes buffered output
    fn event(&mut self, event: EventKind) -> Result<Option<Vec<u8>>>;
}

/// An output format that can be instantiated by id
pub trait OutputFormat: Send + Sync {
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Payload type the format consumes
    fn df_type(&self) -> PacketKind {
        PacketKind::Logic
    }

    /// Build an encoder; `param` is the format specific option string
    fn init(&self, context: &OutputContext, param: Option<&str>) -> Result<Box<dyn Encoder>>;
}

/// Owner of one encoder instance
///
/// The handle drops its encoder on `End`. Every later call fails with
/// [`Error::Released`] instead of touching freed state.
pub struct EncoderHandle {
    format_id: &'static str,
    unit_size: usize,
    state: Option<Box<dyn Encoder>>,
}

impl EncoderHandle {
    pub fn new(format_id: &'static str, encoder: Box<dyn Encoder>) -> Self {
        Self {
            format_id,
            unit_size: encoder.unit_size(),
            state: Some(encoder),
        }
    }

    pub fn format_id(&self) -> &'static str {
        self.format_id
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    pub fn is_released(&self) -> bool {
        self.state.is_none()
    }

    pub fn data(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self.state.as_mut() {
            Some(encoder) => encoder.data(input),
            None => Err(self.released()),
        }
    }

    pub fn event(&mut self, event: EventKind) -> Result<Option<Vec<u8>>> {
        match event {
            EventKind::End => {
                let mut encoder = self.state.take().ok_or_else(|| self.released())?;
                debug!("[{}] End of stream, releasing encoder", self.format_id);
                encoder.event(EventKind::End)
            }
            EventKind::Trigger => match self.state.as_mut() {
                Some(encoder) => encoder.event(event),
                None => Err(self.released()),
            },
        }
    }

    fn released(&self) -> Error {
        error!("[{}] Encoder used after END", self.format_id);
        Error::Released(self.format_id)
    }
}

/// Instantiate the registered format `format_id` for the given context
pub fn init(format_id: &str, context: &OutputContext, param: Option<&str>) -> Result<EncoderHandle> {
    let format =
        find_format(format_id).ok_or_else(|| Error::Arg(format!("unknown output format '{}'", format_id)))?;
    let encoder = format.init(context, param)?;
    debug!(
        "[{}] Encoder ready (unit size {}, param {:?})",
        format.id(),
        encoder.unit_size(),
        param
    );
    Ok(EncoderHandle::new(format.id(), encoder))
}
