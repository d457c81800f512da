//! Human readable rates and timestamps for output headers

use chrono::{DateTime, TimeZone};

const KHZ: u64 = 1_000;
const MHZ: u64 = 1_000_000;
const GHZ: u64 = 1_000_000_000;

/// Format a sample rate with the largest unit it reaches, e.g. "200 kHz"
///
/// The value is truncated, not rounded: 1500 Hz is "1 kHz".
pub fn samplerate_string(samplerate: u64) -> String {
    if samplerate >= GHZ {
        format!("{} GHz", samplerate / GHZ)
    } else if samplerate >= MHZ {
        format!("{} MHz", samplerate / MHZ)
    } else if samplerate >= KHZ {
        format!("{} kHz", samplerate / KHZ)
    } else {
        format!("{} Hz", samplerate)
    }
}

/// Format the sample period belonging to a rate, e.g. 2 MHz gives "500 ns"
pub fn period_string(frequency: u64) -> String {
    if frequency == 0 {
        return "0 s".to_string();
    }
    for (scale, unit) in [(1, "s"), (KHZ, "ms"), (MHZ, "μs"), (GHZ, "ns")] {
        if frequency <= scale {
            return format!("{} {}", scale / frequency, unit);
        }
    }
    format!("{} ns", GHZ / frequency)
}

/// `ctime(3)` layout: "Tue Jan  2 03:04:05 2024\n"
pub fn ctime<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp.format("%a %b %e %H:%M:%S %Y\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samplerate_string() {
        assert_eq!(samplerate_string(0), "0 Hz");
        assert_eq!(samplerate_string(999), "999 Hz");
        assert_eq!(samplerate_string(1000), "1 kHz");
        assert_eq!(samplerate_string(44_100), "44 kHz");
        assert_eq!(samplerate_string(1_000_000), "1 MHz");
        assert_eq!(samplerate_string(200_000_000), "200 MHz");
        assert_eq!(samplerate_string(3_000_000_000), "3 GHz");
    }

    #[test]
    fn test_period_string() {
        assert_eq!(period_string(1), "1 s");
        assert_eq!(period_string(2), "500 ms");
        assert_eq!(period_string(1000), "1 ms");
        assert_eq!(period_string(8000), "125 μs");
        assert_eq!(period_string(1_000_000), "1 μs");
        assert_eq!(period_string(2_000_000), "500 ns");
        assert_eq!(period_string(1_000_000_000), "1 ns");
        assert_eq!(period_string(0), "0 s");
    }
}
