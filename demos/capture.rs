//! Example: Capture samples and render them with an output format
//!
//! Runs an acquisition on one of the built-in drivers and writes the LOGIC stream
//! through an output encoder. A second consumer on its own thread tallies the
//! packets, the way a live display would.
//!
//! Usage:
//!   cargo run --example capture -- --device demo -n 256 --format bits
//!
//! Replay a DSLogic capture as CSV:
//!   cargo run --example capture -- \
//!       --device dsl --file scan.dsl --channels 16 \
//!       -n 10000 --format csv --output scan.csv
//!
//! Audio (in-memory source, analog only, so only the packet tally is printed):
//!   cargo run --example capture -- --device audio --samplerate 44100 -n 4096

use clap::{Parser, ValueEnum};
use probefeed::device::MemorySource;
use probefeed::output::{list_formats, period_string, samplerate_string};
use probefeed::{
    AudioDevice, Capability, ChannelSink, ConfigKey, DemoDevice, DemoPattern, DeviceRegistry,
    DslFileDevice, OutputContext, OutputSink, Packet, ProbeKind, ProbeSetting, Session,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::thread;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeviceKind {
    Demo,
    Audio,
    Dsl,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Driver to capture from
    #[arg(short, long, value_enum, default_value = "demo")]
    device: DeviceKind,

    /// Path to DSL file (dsl device)
    #[arg(short, long)]
    file: Option<String>,

    /// Number of logic channels (demo and dsl devices)
    #[arg(short, long, default_value = "8")]
    channels: usize,

    /// Requested sample rate in Hz
    #[arg(long)]
    samplerate: Option<u64>,

    /// Number of samples to capture
    #[arg(short, long, default_value = "128")]
    n: u64,

    /// Output format id
    #[arg(long, default_value = "bits")]
    format: String,

    /// Output format parameter (separator for csv, samples per line for bits,
    /// start index for ols)
    #[arg(long)]
    param: Option<String>,

    /// Probes to disable, comma separated
    #[arg(long, value_delimiter = ',')]
    disable: Vec<usize>,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// List output formats and exit
    #[arg(long)]
    list_formats: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.list_formats {
        for (id, description) in list_formats() {
            println!("{:8} {}", id, description);
        }
        return Ok(());
    }

    info!("=== Capture Example ===");

    let mut registry = DeviceRegistry::new();
    let id = match args.device {
        DeviceKind::Demo => registry.register(
            DemoDevice::new(args.channels).with_pattern(DemoPattern::Counter),
        ),
        DeviceKind::Audio => {
            warn!("No sound card backend built in, capturing from an in-memory ramp");
            registry.register(AudioDevice::new(MemorySource::ramp(65_536).looping()))
        }
        DeviceKind::Dsl => {
            let file = args.file.as_deref().ok_or("--file is required for the dsl device")?;
            registry.register(DslFileDevice::new(file, args.channels)?)
        }
    };

    registry.open(id)?;
    if let Some(rate) = args.samplerate {
        if registry.device(id)?.has_capability(ConfigKey::SampleRate) {
            registry.set_capability(id, Capability::SampleRate(rate))?;
        } else {
            warn!("Device has a fixed sample rate, ignoring --samplerate {}", rate);
        }
    }
    registry.set_capability(id, Capability::LimitSamples(args.n))?;
    if !args.disable.is_empty() {
        let settings = args
            .disable
            .iter()
            .map(|&index| ProbeSetting::enable(index, false))
            .collect();
        registry.set_capability(id, Capability::ProbeConfig(settings))?;
    }

    let device = registry.device(id)?;
    if let Some(rate) = device.current_samplerate() {
        info!(
            "Device: {} at {} ({} per sample)",
            device.long_name(),
            samplerate_string(rate),
            period_string(rate)
        );
    }
    let has_logic = device.probes().iter().any(|p| p.kind == ProbeKind::Logic);

    let mut session = Session::new();

    if has_logic {
        let context = OutputContext::from_device(device);
        let encoder = probefeed::output::init(&args.format, &context, args.param.as_deref())?;
        let writer: Box<dyn Write + Send> = match &args.output {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(std::io::stdout()),
        };
        session.bus_mut().subscribe(OutputSink::new(encoder, writer));
    } else {
        info!("Device has no logic probes, skipping '{}' output", args.format);
    }

    let (tap, mut receiver) = ChannelSink::bounded(64);
    session.bus_mut().subscribe(tap.with_name("tally"));
    let tally = thread::spawn(move || {
        let (mut packets, mut samples) = (0usize, 0usize);
        while let Some(packet) = receiver.recv() {
            packets += 1;
            samples += packet.sample_count();
            if let Packet::Header(header) = &packet {
                info!(
                    "[tally] Feed: {} Hz, {} logic / {} analog probes",
                    header.samplerate, header.num_logic_probes, header.num_analog_probes
                );
            }
        }
        (packets, samples)
    });

    registry.start_acquisition(id, &mut session)?;
    let result = session.run();

    // Drop the bus so the tally thread sees the channel close even without END
    drop(session);
    let (packets, samples) = tally.join().map_err(|_| "tally thread panicked")?;
    info!("Received {} packets carrying {} samples", packets, samples);

    registry.cleanup();
    result?;
    Ok(())
}
