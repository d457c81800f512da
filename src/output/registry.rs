//! Global table of output formats

use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

use super::OutputFormat;
use super::bits::BitsFormat;
use super::csv::CsvFormat;
use super::ols::OlsFormat;

pub(crate) struct FormatRegistry {
    formats: Vec<&'static dyn OutputFormat>,
}

impl FormatRegistry {
    fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Add a format; a later registration replaces one with the same id
    fn register(&mut self, format: &'static dyn OutputFormat) {
        if let Some(slot) = self.formats.iter_mut().find(|f| f.id() == format.id()) {
            warn!("Output format '{}' registered twice, replacing", format.id());
            *slot = format;
        } else {
            debug!("Registered output format '{}'", format.id());
            self.formats.push(format);
        }
    }

    fn find(&self, id: &str) -> Option<&'static dyn OutputFormat> {
        self.formats.iter().copied().find(|f| f.id() == id)
    }
}

static CSV: CsvFormat = CsvFormat;
static OLS: OlsFormat = OlsFormat;
static BITS: BitsFormat = BitsFormat;

// Global format registry
lazy_static::lazy_static! {
    pub(crate) static ref FORMAT_REGISTRY: Mutex<FormatRegistry> = {
        let mut registry = FormatRegistry::new();
        registry.register(&BITS);
        registry.register(&CSV);
        registry.register(&OLS);
        Mutex::new(registry)
    };
}

/// Make a custom output format available to [`init`](super::init)
pub fn register_format(format: &'static dyn OutputFormat) {
    FORMAT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(format);
}

pub fn find_format(id: &str) -> Option<&'static dyn OutputFormat> {
    FORMAT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .find(id)
}

/// (id, description) of every registered format
pub fn list_formats() -> Vec<(&'static str, &'static str)> {
    FORMAT_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .formats
        .iter()
        .map(|f| (f.id(), f.description()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Encoder, EventKind, OutputContext};
    use crate::{Error, Result};

    struct HexFormat;

    struct HexEncoder;

    impl Encoder for HexEncoder {
        fn unit_size(&self) -> usize {
            1
        }

        fn data(&mut self, input: &[u8]) -> Result<Vec<u8>> {
            Ok(input.iter().map(|b| format!("{:02x}\n", b)).collect::<String>().into_bytes())
        }

        fn event(&mut self, _event: EventKind) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    impl OutputFormat for HexFormat {
        fn id(&self) -> &'static str {
            "hex-test"
        }

        fn description(&self) -> &'static str {
            "Hex bytes"
        }

        fn init(&self, _context: &OutputContext, param: Option<&str>) -> Result<Box<dyn Encoder>> {
            match param {
                None => Ok(Box::new(HexEncoder)),
                Some(p) => Err(Error::Arg(format!("unexpected parameter {}", p))),
            }
        }
    }

    static HEX: HexFormat = HexFormat;

    #[test]
    fn test_builtin_formats() {
        let ids: Vec<&str> = list_formats().into_iter().map(|(id, _)| id).collect();
        for id in ["csv", "ols", "bits"] {
            assert!(ids.contains(&id), "missing {}", id);
        }
        assert_eq!(find_format("csv").map(|f| f.id()), Some("csv"));
        assert!(find_format("nope").is_none());
    }

    #[test]
    fn test_register_custom_format() {
        register_format(&HEX);
        let context = OutputContext::new(crate::output::tests::probes(1));
        let mut handle = crate::output::init("hex-test", &context, None).unwrap();
        assert_eq!(handle.data(&[0xab]).unwrap(), b"ab\n");
        assert!(crate::output::init("hex-test", &context, Some("x")).is_err());
    }
}
