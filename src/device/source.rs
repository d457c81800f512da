//! Capture source abstraction used by the audio driver
//!
//! [`CaptureSource`] is the narrow slice of a PCM capture API the audio driver
//! needs: open a named device, negotiate stream parameters step by step, prepare,
//! and read interleaved signed 16-bit frames. [`MemorySource`] serves canned frames
//! from memory and can be told to fail any negotiation step.

use std::io;
use tracing::debug;

use crate::runtime::Readiness;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("No such capture device: {0}")]
    NotFound(String),

    #[error("Capture device {0} is in use")]
    Busy(String),

    #[error("Cannot set {param}: {reason}")]
    Unsupported { param: &'static str, reason: String },

    #[error("Capture I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Capture device is not open")]
    NotOpen,
}

/// Sample layout in the read buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Frames of all channels back to back
    Interleaved,
    NonInterleaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Signed 16-bit little-endian
    S16Le,
    U8,
}

impl FrameFormat {
    pub fn bytes(self) -> usize {
        match self {
            FrameFormat::S16Le => 2,
            FrameFormat::U8 => 1,
        }
    }
}

/// Negotiated stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub access: AccessMode,
    pub format: FrameFormat,
    pub rate: u32,
    pub channels: u16,
}

/// Negotiation step, for fault injection and log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    Defaults,
    Access,
    Format,
    Rate,
    Channels,
    Apply,
    Prepare,
}

/// PCM-style capture device
pub trait CaptureSource: Send {
    fn open(&mut self, device: &str) -> Result<(), SourceError>;

    /// Release the device; a no-op when not open
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Allocate the parameter space the device would use untouched
    fn default_params(&mut self) -> Result<StreamParams, SourceError>;

    fn set_access(&mut self, access: AccessMode) -> Result<(), SourceError>;

    fn set_format(&mut self, format: FrameFormat) -> Result<(), SourceError>;

    /// Request a rate; returns the nearest rate the device can do
    fn set_rate_near(&mut self, rate: u32) -> Result<u32, SourceError>;

    fn set_channels(&mut self, channels: u16) -> Result<(), SourceError>;

    /// Commit the parameters set so far
    fn apply_params(&mut self) -> Result<StreamParams, SourceError>;

    fn prepare(&mut self) -> Result<(), SourceError>;

    /// What the session waits on before a read
    fn readiness(&self) -> Readiness;

    /// Read up to `frames` interleaved frames into `buf`; returns frames read
    fn read_frames(&mut self, buf: &mut [i16], frames: usize) -> Result<usize, SourceError>;
}

/// In-memory capture source
pub struct MemorySource {
    channels: u16,
    samples: Vec<i16>,
    position: usize,
    rates: Vec<u32>,
    looping: bool,
    busy: bool,
    fail_at: Option<NegotiationStep>,
    device: Option<String>,
    pending: Option<StreamParams>,
    applied: Option<StreamParams>,
    prepared: bool,
}

impl MemorySource {
    /// Serve `samples` as interleaved frames of `channels` channels
    pub fn new(channels: u16, samples: Vec<i16>) -> Self {
        Self {
            channels: channels.max(1),
            samples,
            position: 0,
            rates: vec![8000, 11025, 16000, 22050, 44100, 48000, 96000],
            looping: false,
            busy: false,
            fail_at: None,
            device: None,
            pending: None,
            applied: None,
            prepared: false,
        }
    }

    /// Stereo ramp: left counts up from 0, right counts down from -1
    pub fn ramp(frames: usize) -> Self {
        let samples = (0..frames)
            .flat_map(|i| {
                let v = i as i16;
                [v, -v - 1]
            })
            .collect();
        Self::new(2, samples)
    }

    /// Rates the device can do; `set_rate_near` picks the closest
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    /// Start over at the first frame instead of running dry
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Refuse `open` as if another process held the device
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    pub fn failing_at(mut self, step: NegotiationStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn frames_remaining(&self) -> usize {
        (self.samples.len() - self.position) / self.channels as usize
    }

    pub fn applied_params(&self) -> Option<StreamParams> {
        self.applied
    }

    fn check(&self, step: NegotiationStep, param: &'static str) -> Result<(), SourceError> {
        if self.device.is_none() {
            return Err(SourceError::NotOpen);
        }
        if self.fail_at == Some(step) {
            return Err(SourceError::Unsupported {
                param,
                reason: "rejected by device".to_string(),
            });
        }
        Ok(())
    }

    fn pending_mut(&mut self) -> Result<&mut StreamParams, SourceError> {
        self.pending.as_mut().ok_or(SourceError::NotOpen)
    }
}

impl CaptureSource for MemorySource {
    fn open(&mut self, device: &str) -> Result<(), SourceError> {
        if self.busy {
            return Err(SourceError::Busy(device.to_string()));
        }
        debug!("MemorySource: opened as {}", device);
        self.device = Some(device.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("MemorySource: closed");
        }
        self.pending = None;
        self.applied = None;
        self.prepared = false;
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn default_params(&mut self) -> Result<StreamParams, SourceError> {
        self.check(NegotiationStep::Defaults, "defaults")?;
        let params = StreamParams {
            access: AccessMode::Interleaved,
            format: FrameFormat::S16Le,
            rate: self.rates.first().copied().unwrap_or(8000),
            channels: self.channels,
        };
        self.pending = Some(params);
        Ok(params)
    }

    fn set_access(&mut self, access: AccessMode) -> Result<(), SourceError> {
        self.check(NegotiationStep::Access, "access")?;
        if access != AccessMode::Interleaved {
            return Err(SourceError::Unsupported {
                param: "access",
                reason: format!("{:?} not available", access),
            });
        }
        self.pending_mut()?.access = access;
        Ok(())
    }

    fn set_format(&mut self, format: FrameFormat) -> Result<(), SourceError> {
        self.check(NegotiationStep::Format, "format")?;
        if format != FrameFormat::S16Le {
            return Err(SourceError::Unsupported {
                param: "format",
                reason: format!("{:?} not available", format),
            });
        }
        self.pending_mut()?.format = format;
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, SourceError> {
        self.check(NegotiationStep::Rate, "rate")?;
        let achieved = self
            .rates
            .iter()
            .copied()
            .min_by_key(|r| r.abs_diff(rate))
            .ok_or_else(|| SourceError::Unsupported {
                param: "rate",
                reason: "no rates available".to_string(),
            })?;
        self.pending_mut()?.rate = achieved;
        Ok(achieved)
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), SourceError> {
        self.check(NegotiationStep::Channels, "channels")?;
        if channels != self.channels {
            return Err(SourceError::Unsupported {
                param: "channels",
                reason: format!("device has {} channels, not {}", self.channels, channels),
            });
        }
        self.pending_mut()?.channels = channels;
        Ok(())
    }

    fn apply_params(&mut self) -> Result<StreamParams, SourceError> {
        self.check(NegotiationStep::Apply, "hardware parameters")?;
        let params = *self.pending_mut()?;
        self.applied = Some(params);
        Ok(params)
    }

    fn prepare(&mut self) -> Result<(), SourceError> {
        self.check(NegotiationStep::Prepare, "prepare")?;
        if self.applied.is_none() {
            return Err(SourceError::NotOpen);
        }
        self.prepared = true;
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        Readiness::Timer
    }

    fn read_frames(&mut self, buf: &mut [i16], frames: usize) -> Result<usize, SourceError> {
        if !self.prepared {
            return Err(SourceError::NotOpen);
        }
        let channels = self.channels as usize;
        let frames = frames.min(buf.len() / channels);

        if self.position >= self.samples.len() && self.looping {
            self.position = 0;
        }
        let available = (self.samples.len() - self.position) / channels;
        let n = frames.min(available);
        let len = n * channels;
        buf[..len].copy_from_slice(&self.samples[self.position..self.position + len]);
        self.position += len;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(source: &mut MemorySource) {
        source.open("mem").unwrap();
        source.default_params().unwrap();
        source.set_access(AccessMode::Interleaved).unwrap();
        source.set_format(FrameFormat::S16Le).unwrap();
        source.set_channels(2).unwrap();
        source.apply_params().unwrap();
        source.prepare().unwrap();
    }

    #[test]
    fn test_rate_near_picks_closest() {
        let mut source = MemorySource::ramp(4).with_rates(&[8000, 44100, 48000]);
        source.open("mem").unwrap();
        source.default_params().unwrap();
        assert_eq!(source.set_rate_near(44000).unwrap(), 44100);
        assert_eq!(source.set_rate_near(47000).unwrap(), 48000);
        assert_eq!(source.set_rate_near(1).unwrap(), 8000);
    }

    #[test]
    fn test_busy_device() {
        let mut source = MemorySource::ramp(4).busy();
        assert!(matches!(source.open("hw:0"), Err(SourceError::Busy(_))));
        assert!(!source.is_open());
    }

    #[test]
    fn test_negotiation_requires_open() {
        let mut source = MemorySource::ramp(4);
        assert!(matches!(source.default_params(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_injected_failure() {
        let mut source = MemorySource::ramp(4).failing_at(NegotiationStep::Format);
        source.open("mem").unwrap();
        source.default_params().unwrap();
        source.set_access(AccessMode::Interleaved).unwrap();
        assert!(matches!(
            source.set_format(FrameFormat::S16Le),
            Err(SourceError::Unsupported { param: "format", .. })
        ));
    }

    #[test]
    fn test_read_frames_until_dry() {
        let mut source = MemorySource::ramp(5);
        negotiated(&mut source);
        let mut buf = [0i16; 8];
        assert_eq!(source.read_frames(&mut buf, 4).unwrap(), 4);
        assert_eq!(&buf[..4], &[0, -1, 1, -2]);
        assert_eq!(source.read_frames(&mut buf, 4).unwrap(), 1);
        assert_eq!(&buf[..2], &[4, -5]);
        assert_eq!(source.read_frames(&mut buf, 4).unwrap(), 0);
    }

    #[test]
    fn test_looping_source_never_runs_dry() {
        let mut source = MemorySource::ramp(2).looping();
        negotiated(&mut source);
        let mut buf = [0i16; 4];
        for _ in 0..5 {
            assert_eq!(source.read_frames(&mut buf, 2).unwrap(), 2);
        }
    }

    #[test]
    fn test_close_resets_negotiation() {
        let mut source = MemorySource::ramp(2);
        negotiated(&mut source);
        assert!(source.applied_params().is_some());
        source.close();
        source.close();
        assert!(source.applied_params().is_none());
        let mut buf = [0i16; 4];
        assert!(matches!(source.read_frames(&mut buf, 2), Err(SourceError::NotOpen)));
    }
}
