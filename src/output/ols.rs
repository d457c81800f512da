//! OpenBench Logic Sniffer capture file
//!
//! Text format read by the OLS "alternative" Java client: a `#` comment block with
//! the probe table, `;Key: value` settings, then one `<hex sample>@<index>` line per
//! sample. The record index belongs to the encoder and counts up from zero, or from
//! the start index given as the format parameter when a capture continues an
//! earlier one.

use tracing::debug;

use super::util::samplerate_string;
use super::{Encoder, EventKind, OutputContext, OutputFormat};
use crate::runtime::read_sample;
use crate::{Error, PACKAGE_STRING, Result};

/// Sample count written to `;Size` when the acquisition has no limit
const DEFAULT_NUM_SAMPLES: u64 = 10_000;
const NUM_CURSORS: usize = 10;
const CURSOR_UNSET: i64 = i64::MIN;

pub struct OlsFormat;

impl OutputFormat for OlsFormat {
    fn id(&self) -> &'static str {
        "ols"
    }

    fn description(&self) -> &'static str {
        "OpenBench Logic Sniffer"
    }

    fn init(&self, context: &OutputContext, param: Option<&str>) -> Result<Box<dyn Encoder>> {
        let layout = context.layout()?;
        let start_index = match param {
            None => 0,
            Some(p) => p
                .trim()
                .parse::<u64>()
                .map_err(|e| Error::Arg(format!("invalid ols start index '{}': {}", p, e)))?,
        };

        let samplerate = context.samplerate.unwrap_or(0);
        let num_samples = context.limit_samples.unwrap_or(DEFAULT_NUM_SAMPLES);

        let comment = match context.samplerate {
            Some(rate) => format!(
                "# Comment: Acquisition with {}/{} probes at {}",
                layout.num_enabled(),
                layout.total,
                samplerate_string(rate)
            ),
            None => String::new(),
        };

        let mut header = format!(
            "# Generated by: {} on {}{}\n",
            PACKAGE_STRING,
            context.ctime(),
            comment
        );
        header.push_str("# Probe list used for capturing:\n");
        header.push_str("# Number:\tName:\n");
        for (i, (_, name)) in layout.enabled.iter().enumerate() {
            header.push_str(&format!("# {}\t\t{}\n", i + 1, name));
        }
        header.push_str(&format!(";Size: {}\n", num_samples));
        header.push_str(&format!(";Rate: {}\n", samplerate));
        header.push_str(&format!(";Channels: {}\n", layout.num_enabled()));
        header.push_str(";EnabledChannels: -1\n");
        header.push_str(";Compressed: true\n");
        header.push_str(&format!(";AbsoluteLength: {}\n", num_samples));
        header.push_str(";CursorEnabled: false\n");
        for i in 0..NUM_CURSORS {
            header.push_str(&format!(";Cursor{}: {}\n", i, CURSOR_UNSET));
        }

        Ok(Box::new(OlsEncoder::new(layout.unit_size, header, start_index)))
    }
}

struct OlsEncoder {
    unit_size: usize,
    header: Option<String>,
    next_index: u64,
}

impl OlsEncoder {
    fn new(unit_size: usize, header: String, start_index: u64) -> Self {
        Self {
            unit_size,
            header: Some(header),
            next_index: start_index,
        }
    }

}

impl Encoder for OlsEncoder {
    fn unit_size(&self) -> usize {
        self.unit_size
    }

    fn data(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.header.take().unwrap_or_default();
        for stride in input.chunks_exact(self.unit_size) {
            // The format only carries 32 sample bits
            let sample = read_sample(stride, self.unit_size) as u32;
            out.push_str(&format!("{:08x}@{}\n", sample, self.next_index));
            self.next_index += 1;
        }
        Ok(out.into_bytes())
    }

    fn event(&mut self, event: EventKind) -> Result<Option<Vec<u8>>> {
        if event == EventKind::End {
            debug!("ols: {} records written", self.next_index);
        }
        Ok(None)
    }
}
