//! Device plugins
//!
//! A driver implements [`DevicePlugin`] for one capture source. Configuration goes
//! through typed [`Capability`] values and is gated on the keys the driver
//! advertises. Starting an acquisition publishes the feed header and registers an
//! [`Acquisition`] loop with the [`Session`](crate::runtime::Session).
//!
//! Drivers:
//! - [`AudioDevice`]: two-channel 16-bit sound capture, analog packets
//! - [`DemoDevice`]: virtual pattern generator, logic packets
//! - [`DslFileDevice`]: replays a DSLogic .dsl capture file, logic packets

pub mod acquisition;
pub mod audio;
pub mod capability;
pub mod demo;
mod dsl_file;
pub mod registry;
pub mod source;

pub use acquisition::{Acquisition, AcquisitionControl, AcquisitionState, ChunkReader, SampleBudget};
pub use audio::AudioDevice;
pub use capability::{Capability, ConfigKey, ProbeSetting};
pub use demo::{DemoDevice, DemoPattern};
pub use dsl_file::{DslFileDevice, DslHeader};
pub use registry::{DeviceId, DeviceRegistry};
pub use source::{
    AccessMode, CaptureSource, FrameFormat, MemorySource, NegotiationStep, SourceError,
    StreamParams,
};

use crate::Result;
use crate::runtime::{SampleWidth, Session, SourceId};

/// Signal type of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Logic,
    Analog,
}

/// One logical signal channel of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Ordinal position; for logic probes also the bit position in a sample word
    pub index: usize,
    pub name: String,
    pub enabled: bool,
    pub kind: ProbeKind,
}

impl Probe {
    /// New enabled probe
    pub fn new(index: usize, name: impl Into<String>, kind: ProbeKind) -> Self {
        Self {
            index,
            name: name.into(),
            enabled: true,
            kind,
        }
    }
}

/// Device instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Registered, source not acquired
    Inactive,
    /// Source handle held
    Active,
}

/// Contract every capture driver implements
pub trait DevicePlugin: Send {
    /// Short driver identifier
    fn name(&self) -> &str;

    /// Human readable driver name
    fn long_name(&self) -> &str;

    /// Configuration keys accepted by `set_capability`
    fn capabilities(&self) -> &[ConfigKey];

    fn probes(&self) -> &[Probe];

    fn status(&self) -> DeviceStatus;

    /// Current sample rate in Hz; after an acquisition start this is the achieved rate
    fn current_samplerate(&self) -> Option<u64>;

    /// Configured sample budget, if any
    fn limit_samples(&self) -> Option<u64>;

    /// Width of the logic samples this device produces (None for analog-only devices)
    fn sample_width(&self) -> Option<SampleWidth> {
        None
    }

    fn has_capability(&self, key: ConfigKey) -> bool {
        self.capabilities().contains(&key)
    }

    /// Acquire the source handle and negotiate default parameters
    fn open(&mut self) -> Result<()>;

    /// Release the handle and negotiated parameters; a no-op when already closed
    fn close(&mut self) -> Result<()>;

    /// Validate and apply one configuration value
    fn set_capability(&mut self, capability: Capability) -> Result<()>;

    /// Negotiate stream parameters, publish the feed header and register the
    /// acquisition loop with `session`
    fn start_acquisition(&mut self, session: &mut Session) -> Result<SourceId>;

    /// Ask a running acquisition to finish; it ends the feed at its next dispatch
    fn stop_acquisition(&mut self, session: &mut Session);
}
