//! Bit-per-character text
//!
//! Every enabled probe gets its own line of `0`/`1` characters, with a space after
//! each group of 8 samples. Once a line holds `samples_per_line` samples (the format
//! parameter, 64 by default) the lines of all probes are written out together as one
//! block, each prefixed by the probe name:
//!
//! ```text
//!  D0:10101010 10101010
//!  D1:11001100 11001100
//! CLK:11110000 11110000
//! ```
//!
//! A trigger marks the current column; the next block is followed by a `T:` line with
//! a caret under it.

use tracing::{debug, info};

use super::util::samplerate_string;
use super::{Encoder, EventKind, OutputContext, OutputFormat};
use crate::runtime::read_sample;
use crate::{Error, PACKAGE_STRING, Result};

pub const DEFAULT_SAMPLES_PER_LINE: usize = 64;

pub struct BitsFormat;

impl OutputFormat for BitsFormat {
    fn id(&self) -> &'static str {
        "bits"
    }

    fn description(&self) -> &'static str {
        "Bits (takes argument, default 64)"
    }

    fn init(&self, context: &OutputContext, param: Option<&str>) -> Result<Box<dyn Encoder>> {
        let layout = context.layout()?;
        let samples_per_line = match param {
            None => DEFAULT_SAMPLES_PER_LINE,
            Some(p) => match p.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Arg(format!(
                        "samples per line must be a positive number, got '{}'",
                        p
                    )));
                }
            },
        };

        let mut header = format!("{}\n", PACKAGE_STRING);
        if let Some(rate) = context.samplerate {
            header.push_str(&format!(
                "Acquisition with {}/{} probes at {}\n",
                layout.num_enabled(),
                layout.total,
                samplerate_string(rate)
            ));
        }

        let name_width = layout
            .enabled
            .iter()
            .map(|(_, name)| name.chars().count())
            .max()
            .unwrap_or(0);
        let line_capacity = samples_per_line + samples_per_line / 8;

        Ok(Box::new(BitsEncoder {
            probes: layout.enabled,
            name_width,
            unit_size: layout.unit_size,
            samples_per_line,
            lines: Vec::new(),
            line_capacity,
            spl_count: 0,
            trigger_mark: None,
            header: Some(header),
        }))
    }
}

struct BitsEncoder {
    probes: Vec<(usize, String)>,
    name_width: usize,
    unit_size: usize,
    samples_per_line: usize,
    /// Pending line per enabled probe
    lines: Vec<String>,
    line_capacity: usize,
    /// Samples in the pending lines
    spl_count: usize,
    /// Sample column of the last trigger within the pending block
    trigger_mark: Option<usize>,
    header: Option<String>,
}

impl BitsEncoder {
    fn flush(&mut self, out: &mut String) {
        for ((_, name), line) in self.probes.iter().zip(self.lines.iter_mut()) {
            out.push_str(&format!("{:>width$}:{}\n", name, line, width = self.name_width));
            line.clear();
        }
        if let Some(mark) = self.trigger_mark.take() {
            out.push_str("T:");
            out.push_str(&" ".repeat(mark + mark / 8));
            out.push_str("^\n");
        }
        self.spl_count = 0;
    }
}

impl Encoder for BitsEncoder {
    fn unit_size(&self) -> usize {
        self.unit_size
    }

    fn data(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.header.take().unwrap_or_default();
        if input.len() < self.unit_size {
            info!("bits: short buffer (length_in={})", input.len());
            return Ok(out.into_bytes());
        }
        if self.lines.is_empty() {
            self.lines = vec![String::with_capacity(self.line_capacity); self.probes.len()];
        }

        for stride in input.chunks_exact(self.unit_size) {
            let sample = read_sample(stride, self.unit_size);
            for ((bit, _), line) in self.probes.iter().zip(self.lines.iter_mut()) {
                line.push(if (sample >> bit) & 1 == 1 { '1' } else { '0' });
            }
            self.spl_count += 1;

            if self.spl_count % 8 == 0 {
                for line in self.lines.iter_mut() {
                    line.push(' ');
                }
            }
            if self.spl_count >= self.samples_per_line {
                self.flush(&mut out);
            }
        }
        Ok(out.into_bytes())
    }

    fn event(&mut self, event: EventKind) -> Result<Option<Vec<u8>>> {
        match event {
            EventKind::Trigger => {
                debug!("bits: trigger at column {}", self.spl_count);
                self.trigger_mark = Some(self.spl_count);
                Ok(None)
            }
            EventKind::End => {
                if self.spl_count == 0 {
                    return Ok(None);
                }
                let mut out = String::new();
                self.flush(&mut out);
                Ok(Some(out.into_bytes()))
            }
        }
    }
}
