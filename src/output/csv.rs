//! Comma-separated values
//!
//! One row per sample and one column per enabled probe, the most significant
//! enabled probe first. Every field is followed by the separator, including the
//! last one, so rows look like `0,1,`. The optional parameter replaces the default
//! `,` separator with another single character.

use tracing::debug;

use super::{Encoder, EventKind, OutputContext, OutputFormat};
use crate::runtime::read_sample;
use crate::{Error, PACKAGE_STRING, Result};

pub struct CsvFormat;

impl OutputFormat for CsvFormat {
    fn id(&self) -> &'static str {
        "csv"
    }

    fn description(&self) -> &'static str {
        "Comma-separated values (CSV)"
    }

    fn init(&self, context: &OutputContext, param: Option<&str>) -> Result<Box<dyn Encoder>> {
        let layout = context.layout()?;

        let separator = match param {
            None => ',',
            Some(p) => {
                let mut chars = p.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c != '\n' && !c.is_ascii_digit() => c,
                    _ => {
                        return Err(Error::Arg(format!(
                            "csv separator must be one character other than a digit or newline, got '{}'",
                            p
                        )));
                    }
                }
            }
        };

        let mut header = format!("; CSV, generated by {} on {}", PACKAGE_STRING, context.ctime());
        header.push_str(&format!("; Samplerate: {}\n", context.samplerate.unwrap_or(0)));
        header.push_str(&format!(
            "; Channels ({}/{}): ",
            layout.num_enabled(),
            layout.total
        ));
        for (_, name) in &layout.enabled {
            header.push_str(name);
            header.push_str(", ");
        }
        header.push('\n');

        let mut columns: Vec<usize> = layout.enabled.iter().map(|(index, _)| *index).collect();
        columns.reverse();

        Ok(Box::new(CsvEncoder {
            columns,
            unit_size: layout.unit_size,
            separator,
            header: Some(header),
        }))
    }
}

struct CsvEncoder {
    /// Bit index per column, most significant first
    columns: Vec<usize>,
    unit_size: usize,
    separator: char,
    header: Option<String>,
}

impl Encoder for CsvEncoder {
    fn unit_size(&self) -> usize {
        self.unit_size
    }

    fn data(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.header.take().unwrap_or_default();
        for stride in input.chunks_exact(self.unit_size) {
            let sample = read_sample(stride, self.unit_size);
            for &bit in &self.columns {
                out.push(if (sample >> bit) & 1 == 1 { '1' } else { '0' });
                out.push(self.separator);
            }
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn event(&mut self, event: EventKind) -> Result<Option<Vec<u8>>> {
        debug!("csv: {:?} event", event);
        Ok(None)
    }
}
