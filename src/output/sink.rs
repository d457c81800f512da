//! Bus subscriber that renders packets through an encoder into a writer

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, trace, warn};

use super::{EncoderHandle, EventKind};
use crate::runtime::{DeliveryError, Packet, PacketSink, SinkResult};

/// Feeds LOGIC payloads and feed events to an [`EncoderHandle`] and writes the result
///
/// HEADER and ANALOG packets are skipped; the encoders render logic data only.
/// LOGIC payloads whose sample width differs from the encoder's unit size are refused
/// with [`DeliveryError::UnitSize`]. The writer is flushed when the feed ends.
pub struct OutputSink<W: Write + Send> {
    name: String,
    encoder: EncoderHandle,
    writer: W,
    bytes_written: u64,
    width_warned: bool,
}

impl<W: Write + Send> OutputSink<W> {
    pub fn new(encoder: EncoderHandle, writer: W) -> Self {
        Self {
            name: format!("output_{}", encoder.format_id()),
            encoder,
            writer,
            bytes_written: 0,
            width_warned: false,
        }
    }

    /// Set custom name (builder pattern)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl<W: Write + Send> PacketSink for OutputSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&mut self, packet: &Packet) -> SinkResult {
        match packet {
            Packet::Logic(payload) => {
                if payload.unit_size() != self.encoder.unit_size() {
                    if !self.width_warned {
                        warn!(
                            "[{}] Payload samples are {} bytes, encoder expects {}",
                            self.name,
                            payload.unit_size(),
                            self.encoder.unit_size()
                        );
                        self.width_warned = true;
                    }
                    return Err(DeliveryError::UnitSize {
                        expected: self.encoder.unit_size(),
                        got: payload.unit_size(),
                    });
                }
                let out = self.encoder.data(payload.as_bytes())?;
                self.write(&out)?;
            }
            Packet::Trigger => {
                if let Some(out) = self.encoder.event(EventKind::Trigger)? {
                    self.write(&out)?;
                }
            }
            Packet::End => {
                if let Some(out) = self.encoder.event(EventKind::End)? {
                    self.write(&out)?;
                }
                self.writer.flush()?;
                info!("[{}] Output complete, {} bytes", self.name, self.bytes_written);
            }
            Packet::Header(header) => {
                debug!("[{}] Feed started at {} Hz", self.name, header.samplerate);
            }
            Packet::Analog(_) => trace!("[{}] Skipping analog packet", self.name),
        }
        Ok(())
    }
}

/// Cloneable in-memory writer; every clone appends to the same buffer
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Capability, DemoDevice, DemoPattern, DeviceRegistry};
    use crate::output::tests::{fixed_time, probes};
    use crate::output::{OutputContext, init};
    use crate::runtime::{
        AnalogPayload, AnalogValue, Header, LogicPayload, PacketBus, SampleBuffer, SampleWidth,
        Session,
    };
    use crate::Error;

    fn logic(width: SampleWidth, samples: &[u32]) -> Packet {
        Packet::Logic(LogicPayload::new(SampleBuffer::from_samples(width, samples)))
    }

    #[test]
    fn test_demo_to_csv_end_to_end() {
        let mut registry = DeviceRegistry::new();
        let id = registry.register(
            DemoDevice::new(2)
                .with_sample_width(SampleWidth::U16)
                .with_pattern(DemoPattern::Sequence(vec![0x0001, 0x0002, 0x0003])),
        );
        registry.open(id).unwrap();
        registry.set_capability(id, Capability::SampleRate(1000)).unwrap();
        registry.set_capability(id, Capability::LimitSamples(3)).unwrap();

        let context = OutputContext::from_device(registry.device(id).unwrap())
            .with_timestamp(fixed_time());
        let encoder = init("csv", &context, None).unwrap();
        assert_eq!(encoder.unit_size(), 2);

        let writer = MemoryWriter::new();
        let mut session = Session::new();
        session.bus_mut().subscribe(OutputSink::new(encoder, writer.clone()));
        registry.start_acquisition(id, &mut session).unwrap();
        session.run().unwrap();

        let out = writer.to_string_lossy();
        assert!(out.contains("; Samplerate: 1000\n"));
        assert!(out.contains("; Channels (2/2): D0, D1, \n"));
        let rows: Vec<&str> = out.lines().filter(|l| !l.starts_with(';')).collect();
        assert_eq!(rows, vec!["0,1,", "1,0,", "1,1,"]);
    }

    #[test]
    fn test_sink_skips_header_and_analog() {
        let context = OutputContext::new(probes(8)).with_timestamp(fixed_time());
        let writer = MemoryWriter::new();
        let mut sink = OutputSink::new(init("ols", &context, None).unwrap(), writer.clone());

        sink.deliver(&Packet::Header(Header::new(1000, 8, 0))).unwrap();
        sink.deliver(&Packet::Analog(AnalogPayload::new(1, vec![AnalogValue::new(1, 16)])))
            .unwrap();
        assert!(writer.contents().is_empty());

        sink.deliver(&logic(SampleWidth::U8, &[0xaa])).unwrap();
        sink.deliver(&Packet::Trigger).unwrap();
        sink.deliver(&Packet::End).unwrap();
        assert!(writer.to_string_lossy().ends_with("000000aa@0\n"));
        assert_eq!(sink.bytes_written(), writer.contents().len() as u64);
    }

    #[test]
    fn test_bits_flushed_on_end() {
        let context = OutputContext::new(probes(1));
        let writer = MemoryWriter::new();
        let mut bus = PacketBus::new();
        bus.subscribe(OutputSink::new(init("bits", &context, Some("8")).unwrap(), writer.clone()));

        bus.publish(Packet::Header(Header::new(1000, 1, 0)));
        bus.publish(logic(SampleWidth::U8, &[1, 0, 1]));
        assert!(!writer.to_string_lossy().contains("D0:"));
        bus.publish(Packet::End);
        assert!(writer.to_string_lossy().ends_with("D0:101\n"));
    }

    #[test]
    fn test_second_feed_hits_released_encoder() {
        let context = OutputContext::new(probes(1));
        let mut sink = OutputSink::new(init("csv", &context, None).unwrap(), MemoryWriter::new());
        sink.deliver(&Packet::End).unwrap();
        let result = sink.deliver(&logic(SampleWidth::U8, &[1]));
        assert!(matches!(
            result,
            Err(DeliveryError::Encoder(Error::Released("csv")))
        ));
    }

    #[test]
    fn test_mismatched_width_is_a_delivery_failure() {
        let context = OutputContext::new(probes(4)).with_timestamp(fixed_time());
        let writer = MemoryWriter::new();
        let mut bus = PacketBus::new();
        bus.subscribe(OutputSink::new(init("ols", &context, None).unwrap(), writer.clone()));

        bus.publish(Packet::Header(Header::new(1000, 4, 0)));
        let report = bus.publish(logic(SampleWidth::U16, &[0x0102, 0x0304]));
        assert_eq!(report.failed, 1);
        assert_eq!(bus.delivery_failures(), 1);
        assert!(writer.contents().is_empty());

        let mut sink = OutputSink::new(init("ols", &context, None).unwrap(), MemoryWriter::new());
        assert!(matches!(
            sink.deliver(&logic(SampleWidth::U32, &[1])),
            Err(DeliveryError::UnitSize { expected: 1, got: 4 })
        ));
        assert!(sink.deliver(&logic(SampleWidth::U8, &[1])).is_ok());
    }

    #[test]
    fn test_failing_writer_reported_to_bus() {
        struct BrokenPipe;
        impl Write for BrokenPipe {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let context = OutputContext::new(probes(1));
        let mut bus = PacketBus::new();
        bus.subscribe(OutputSink::new(init("csv", &context, None).unwrap(), BrokenPipe));
        bus.publish(Packet::Header(Header::new(1000, 1, 0)));
        let report = bus.publish(logic(SampleWidth::U8, &[1]));
        assert_eq!(report.failed, 1);
        assert_eq!(bus.delivery_failures(), 1);
    }
}
