//! Typed device configuration values

use tracing::debug;

use super::Probe;
use crate::{Error, Result};

/// Configuration key a driver may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    SampleRate,
    LimitSamples,
    Continuous,
    ProbeConfig,
}

/// Change to one probe: rename and/or enable/disable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSetting {
    pub index: usize,
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

impl ProbeSetting {
    pub fn enable(index: usize, enabled: bool) -> Self {
        Self {
            index,
            name: None,
            enabled: Some(enabled),
        }
    }

    pub fn rename(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: Some(name.into()),
            enabled: None,
        }
    }
}

/// A configuration value, tagged with the key it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Requested sample rate in Hz; the achieved rate is reported in the feed header
    SampleRate(u64),
    /// Number of samples to acquire before stopping
    LimitSamples(u64),
    /// Acquire until explicitly stopped
    Continuous(bool),
    ProbeConfig(Vec<ProbeSetting>),
}

impl Capability {
    pub fn key(&self) -> ConfigKey {
        match self {
            Capability::SampleRate(_) => ConfigKey::SampleRate,
            Capability::LimitSamples(_) => ConfigKey::LimitSamples,
            Capability::Continuous(_) => ConfigKey::Continuous,
            Capability::ProbeConfig(_) => ConfigKey::ProbeConfig,
        }
    }
}

/// Reject a capability the device does not advertise
pub fn ensure_supported(device: &str, advertised: &[ConfigKey], key: ConfigKey) -> Result<()> {
    if advertised.contains(&key) {
        Ok(())
    } else {
        Err(Error::Unsupported {
            key,
            device: device.to_string(),
        })
    }
}

/// Value checks shared by every driver
pub fn validate(capability: &Capability, probes: &[Probe]) -> Result<()> {
    let invalid = |reason: String| Error::InvalidValue {
        key: capability.key(),
        reason,
    };
    match capability {
        Capability::SampleRate(0) => Err(invalid("sample rate must be non-zero".to_string())),
        Capability::LimitSamples(0) => Err(invalid("sample limit must be non-zero".to_string())),
        Capability::ProbeConfig(settings) => {
            for setting in settings {
                if setting.index >= probes.len() {
                    return Err(invalid(format!(
                        "probe {} out of range (device has {})",
                        setting.index,
                        probes.len()
                    )));
                }
                if let Some(name) = &setting.name
                    && name.trim().is_empty()
                {
                    return Err(invalid(format!("empty name for probe {}", setting.index)));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Apply validated probe settings in order
pub fn apply_probe_settings(probes: &mut [Probe], settings: &[ProbeSetting]) {
    for setting in settings {
        if let Some(probe) = probes.get_mut(setting.index) {
            if let Some(name) = &setting.name {
                probe.name = name.clone();
            }
            if let Some(enabled) = setting.enabled {
                probe.enabled = enabled;
            }
            debug!(
                "Probe {} is now '{}' ({})",
                probe.index,
                probe.name,
                if probe.enabled { "enabled" } else { "disabled" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProbeKind;

    fn probes(n: usize) -> Vec<Probe> {
        (0..n).map(|i| Probe::new(i, format!("D{}", i), ProbeKind::Logic)).collect()
    }

    #[test]
    fn test_key_matches_variant() {
        assert_eq!(Capability::SampleRate(1).key(), ConfigKey::SampleRate);
        assert_eq!(Capability::LimitSamples(1).key(), ConfigKey::LimitSamples);
        assert_eq!(Capability::Continuous(true).key(), ConfigKey::Continuous);
        assert_eq!(Capability::ProbeConfig(vec![]).key(), ConfigKey::ProbeConfig);
    }

    #[test]
    fn test_ensure_supported() {
        let advertised = [ConfigKey::SampleRate];
        assert!(ensure_supported("demo", &advertised, ConfigKey::SampleRate).is_ok());
        match ensure_supported("demo", &advertised, ConfigKey::Continuous) {
            Err(Error::Unsupported { key, device }) => {
                assert_eq!(key, ConfigKey::Continuous);
                assert_eq!(device, "demo");
            }
            other => panic!("Expected Unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(matches!(
            validate(&Capability::SampleRate(0), &[]),
            Err(Error::InvalidValue { key: ConfigKey::SampleRate, .. })
        ));
        assert!(matches!(
            validate(&Capability::LimitSamples(0), &[]),
            Err(Error::InvalidValue { key: ConfigKey::LimitSamples, .. })
        ));
        assert!(validate(&Capability::SampleRate(8000), &[]).is_ok());
    }

    #[test]
    fn test_validate_probe_range_and_names() {
        let probes = probes(2);
        let ok = Capability::ProbeConfig(vec![ProbeSetting::enable(1, false)]);
        assert!(validate(&ok, &probes).is_ok());

        let out_of_range = Capability::ProbeConfig(vec![ProbeSetting::enable(2, false)]);
        assert!(validate(&out_of_range, &probes).is_err());

        let blank = Capability::ProbeConfig(vec![ProbeSetting::rename(0, "  ")]);
        assert!(validate(&blank, &probes).is_err());
    }

    #[test]
    fn test_apply_probe_settings() {
        let mut probes = probes(3);
        apply_probe_settings(
            &mut probes,
            &[ProbeSetting::rename(0, "CLK"), ProbeSetting::enable(2, false)],
        );
        assert_eq!(probes[0].name, "CLK");
        assert!(probes[0].enabled);
        assert!(!probes[2].enabled);
    }
}
