//! Signal acquisition with a packet bus and streaming output encoders
//!
//! This library turns a capture source (sound card, virtual pattern generator or a
//! DSLogic .dsl capture file) into a uniform stream of data feed packets, and renders
//! that stream through pluggable, incrementally-fed text encoders.
//!
//! # Architecture
//!
//! - **Devices**: [`DevicePlugin`] drivers configured through typed [`Capability`] values,
//!   owned by a [`DeviceRegistry`] keyed by generated [`DeviceId`]s
//! - **Acquisition**: a readiness-driven loop that reads bounded chunks and publishes
//!   [`Packet`]s until its sample budget is spent
//! - **Session**: single-threaded event loop plus the [`PacketBus`] that fans packets out
//! - **Output**: CSV, OpenBench Logic Sniffer and bit-per-line encoders behind an
//!   [`EncoderHandle`], attached to the bus with an [`OutputSink`]
//!
//! # Example
//!
//! ```no_run
//! use probefeed::{Capability, DemoDevice, DeviceRegistry, OutputContext, OutputSink, Session};
//!
//! let mut registry = DeviceRegistry::new();
//! let id = registry.register(DemoDevice::new(8));
//! registry.open(id)?;
//! registry.set_capability(id, Capability::SampleRate(1_000_000))?;
//! registry.set_capability(id, Capability::LimitSamples(4096))?;
//!
//! let context = OutputContext::from_device(registry.device(id)?);
//! let encoder = probefeed::output::init("csv", &context, None)?;
//!
//! let mut session = Session::new();
//! session.bus_mut().subscribe(OutputSink::new(encoder, std::io::stdout()));
//! registry.start_acquisition(id, &mut session)?;
//! session.run()?;
//! # Ok::<(), probefeed::Error>(())
//! ```

use thiserror::Error;

pub mod device;
pub mod output;
pub mod runtime;

pub use device::{
    AudioDevice, Capability, ConfigKey, DemoDevice, DemoPattern, DeviceId, DevicePlugin,
    DeviceRegistry, DeviceStatus, DslFileDevice, Probe, ProbeKind, ProbeSetting,
};
pub use output::{EncoderHandle, EventKind, OutputContext, OutputFormat, OutputSink};
pub use runtime::{
    AnalogPayload, AnalogValue, ChannelSink, Header, LogicPayload, Packet, PacketBus,
    PacketKind, PacketReceiver, PacketSink, SampleBuffer, SampleWidth, Session, SourceId,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    Arg(String),

    #[error("Allocation failed: {0}")]
    Malloc(String),

    #[error("Capability {key:?} not supported by {device}")]
    Unsupported { key: ConfigKey, device: String },

    #[error("Invalid value for {key:?}: {reason}")]
    InvalidValue { key: ConfigKey, reason: String },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Device {0} not found")]
    NotFound(DeviceId),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Encoder '{0}' already released by END")]
    Released(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Generator string written into output headers
pub const PACKAGE_STRING: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));
