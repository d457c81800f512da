//! Raw sample storage shared by packets, drivers and encoders

use std::fmt;
use std::sync::Arc;

/// Byte width of one multiplexed sample as produced by a source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    U8,
    U16,
    U32,
}

impl SampleWidth {
    /// Width for a given byte count, if supported
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            1 => Some(SampleWidth::U8),
            2 => Some(SampleWidth::U16),
            4 => Some(SampleWidth::U32),
            _ => None,
        }
    }

    /// Smallest width able to hold one bit per probe
    pub fn for_probes(num_probes: usize) -> Option<Self> {
        match num_probes {
            1..=8 => Some(SampleWidth::U8),
            9..=16 => Some(SampleWidth::U16),
            17..=32 => Some(SampleWidth::U32),
            _ => None,
        }
    }

    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::U8 => 1,
            SampleWidth::U16 => 2,
            SampleWidth::U32 => 4,
        }
    }

    #[inline]
    pub fn bits(self) -> usize {
        self.bytes() * 8
    }
}

/// Read one little-endian sample word of `unit_size` bytes (1..=8) from the front of `bytes`
///
/// This is the single decoding path for raw sample bytes, whatever their width.
#[inline]
pub fn read_sample(bytes: &[u8], unit_size: usize) -> u64 {
    let mut word = [0u8; 8];
    let len = unit_size.min(8).min(bytes.len());
    word[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(word)
}

/// A buffer of multiplexed samples tagged with its declared width
///
/// Samples are stored little-endian, back to back. The storage is shared via `Arc`
/// so a packet carrying it can be fanned out without copying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleBuffer {
    width: SampleWidth,
    data: Arc<[u8]>,
}

impl SampleBuffer {
    /// Wrap raw little-endian bytes. Trailing bytes short of a full sample are kept
    /// in storage but never addressed as a sample.
    pub fn from_bytes(width: SampleWidth, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            data: data.into(),
        }
    }

    /// Encode sample words at the given width, truncating each word to that width
    pub fn from_samples(width: SampleWidth, samples: &[u32]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * width.bytes());
        for &sample in samples {
            data.extend_from_slice(&sample.to_le_bytes()[..width.bytes()]);
        }
        Self::from_bytes(width, data)
    }

    pub fn width(&self) -> SampleWidth {
        self.width
    }

    /// Number of whole samples in the buffer
    pub fn len(&self) -> usize {
        self.data.len() / self.width.bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Sample word at `index`
    ///
    /// `index` must be below `len()`.
    #[inline]
    pub fn sample(&self, index: usize) -> u32 {
        let unit = self.width.bytes();
        read_sample(&self.data[index * unit..(index + 1) * unit], unit) as u32
    }

    /// O(1) bit lookup: state of `probe` in the sample at `index`
    #[inline]
    pub fn bit(&self, index: usize, probe: usize) -> bool {
        probe < self.width.bits() && (self.sample(index) >> probe) & 1 == 1
    }

    pub fn samples(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(move |i| self.sample(i))
    }
}

impl fmt::Display for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SampleBuffer[width={}, samples={}, bytes={}]",
            self.width.bytes(),
            self.len(),
            self.data.len()
        )
    }
}

/// One probe reading inside an analog record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalogValue {
    /// Raw reading
    pub value: u32,
    /// Significant bits in `value`
    pub resolution: u8,
}

impl AnalogValue {
    pub fn new(value: u32, resolution: u8) -> Self {
        Self { value, resolution }
    }
}
