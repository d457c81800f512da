//! Registry of device instances keyed by generated identifiers

use std::fmt;
use tracing::{debug, info, warn};

use super::capability::{Capability, ensure_supported};
use super::DevicePlugin;
use crate::runtime::{Session, SourceId};
use crate::{Error, Result};

/// Identifier of a registered device instance
///
/// Identifiers are never reused, so removing one device cannot make another
/// device's id point at the wrong instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns every device instance of the process
pub struct DeviceRegistry {
    devices: Vec<(DeviceId, Box<dyn DevicePlugin>)>,
    next_id: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a driver instance (inactive, no I/O) and return its id
    pub fn register<D: DevicePlugin + 'static>(&mut self, device: D) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        info!("Registered device {} ({})", id, device.long_name());
        self.devices.push((id, Box::new(device)));
        id
    }

    pub fn device(&self, id: DeviceId) -> Result<&dyn DevicePlugin> {
        self.devices
            .iter()
            .find(|(d, _)| *d == id)
            .map(|(_, device)| device.as_ref())
            .ok_or(Error::NotFound(id))
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Result<&mut (dyn DevicePlugin + 'static)> {
        self.devices
            .iter_mut()
            .find(|(d, _)| *d == id)
            .map(|(_, device)| device.as_mut())
            .ok_or(Error::NotFound(id))
    }

    /// Registered ids with their driver names, in registration order
    pub fn list(&self) -> Vec<(DeviceId, &str)> {
        self.devices.iter().map(|(id, d)| (*id, d.name())).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn open(&mut self, id: DeviceId) -> Result<()> {
        self.device_mut(id)?.open()
    }

    pub fn close(&mut self, id: DeviceId) -> Result<()> {
        self.device_mut(id)?.close()
    }

    /// Check the key against the advertised set, then hand the value to the driver
    pub fn set_capability(&mut self, id: DeviceId, capability: Capability) -> Result<()> {
        let device = self.device_mut(id)?;
        ensure_supported(device.name(), device.capabilities(), capability.key())?;
        device.set_capability(capability)
    }

    pub fn start_acquisition(&mut self, id: DeviceId, session: &mut Session) -> Result<SourceId> {
        self.device_mut(id)?.start_acquisition(session)
    }

    pub fn stop_acquisition(&mut self, id: DeviceId, session: &mut Session) -> Result<()> {
        self.device_mut(id)?.stop_acquisition(session);
        Ok(())
    }

    /// Close and drop one instance
    pub fn remove(&mut self, id: DeviceId) -> Result<()> {
        let pos = self
            .devices
            .iter()
            .position(|(d, _)| *d == id)
            .ok_or(Error::NotFound(id))?;
        let (_, mut device) = self.devices.remove(pos);
        if let Err(e) = device.close() {
            warn!("Device {}: close during removal failed: {}", id, e);
        }
        debug!("Removed device {}", id);
        Ok(())
    }

    /// Close and drop every instance
    pub fn cleanup(&mut self) {
        for (id, mut device) in self.devices.drain(..) {
            if let Err(e) = device.close() {
                warn!("Device {}: close during cleanup failed: {}", id, e);
            }
        }
        info!("Device registry cleaned up");
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if !self.devices.is_empty() {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConfigKey, DemoDevice, DeviceStatus};

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DeviceRegistry::new();
        let a = registry.register(DemoDevice::new(8));
        let b = registry.register(DemoDevice::new(4));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.device(b).unwrap().probes().len(), 4);
        assert_eq!(registry.device(a).unwrap().status(), DeviceStatus::Inactive);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let mut registry = DeviceRegistry::new();
        let id = registry.register(DemoDevice::new(8));
        registry.remove(id).unwrap();

        assert!(matches!(registry.open(id), Err(Error::NotFound(_))));
        assert!(matches!(registry.close(id), Err(Error::NotFound(_))));
        assert!(matches!(registry.remove(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_ids_are_not_reused_after_removal() {
        let mut registry = DeviceRegistry::new();
        let first = registry.register(DemoDevice::new(8));
        let second = registry.register(DemoDevice::new(2));
        registry.remove(first).unwrap();
        let third = registry.register(DemoDevice::new(3));

        assert_ne!(third, first);
        assert_eq!(registry.device(second).unwrap().probes().len(), 2);
        assert_eq!(registry.device(third).unwrap().probes().len(), 3);
    }

    #[test]
    fn test_open_close_status() {
        let mut registry = DeviceRegistry::new();
        let id = registry.register(DemoDevice::new(8));
        registry.open(id).unwrap();
        assert_eq!(registry.device(id).unwrap().status(), DeviceStatus::Active);
        registry.close(id).unwrap();
        registry.close(id).unwrap();
        assert_eq!(registry.device(id).unwrap().status(), DeviceStatus::Inactive);
    }

    #[test]
    fn test_unadvertised_capability_rejected() {
        let mut registry = DeviceRegistry::new();
        let id = registry.register(
            DemoDevice::new(8).with_capabilities(&[ConfigKey::SampleRate]),
        );
        let result = registry.set_capability(id, Capability::LimitSamples(10));
        assert!(matches!(
            result,
            Err(Error::Unsupported { key: ConfigKey::LimitSamples, .. })
        ));
        assert_eq!(registry.device(id).unwrap().limit_samples(), None);
    }

    #[test]
    fn test_cleanup_empties_registry() {
        let mut registry = DeviceRegistry::new();
        let id = registry.register(DemoDevice::new(8));
        registry.open(id).unwrap();
        registry.cleanup();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }
}
