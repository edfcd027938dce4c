use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::{DevEui, Error, Result};
use super::state::EndDevice;

/// Registered devices by DevEUI, each behind its own lock
///
/// Handling for one device is serialized while distinct devices proceed in
/// parallel. The map shard guard is released before a device lock is awaited.
#[derive(Default)]
pub struct DeviceTable {
    devices: DashMap<DevEui, Arc<Mutex<EndDevice>>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device, replacing any previous record
    pub fn insert(&self, device: EndDevice) {
        self.devices.insert(device.dev_eui, Arc::new(Mutex::new(device)));
    }

    pub fn remove(&self, dev_eui: &DevEui) -> bool {
        self.devices.remove(dev_eui).is_some()
    }

    pub fn contains(&self, dev_eui: &DevEui) -> bool {
        self.devices.contains_key(dev_eui)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Acquires exclusive access to a device
    pub async fn lock(&self, dev_eui: &DevEui) -> Result<OwnedMutexGuard<EndDevice>> {
        let device = self
            .devices
            .get(dev_eui)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_found(format!("device {} not registered", dev_eui)))?;
        Ok(device.lock_owned().await)
    }

    /// Runs `f` with exclusive access to a device
    pub async fn with_device<F, R>(&self, dev_eui: &DevEui, f: F) -> Result<R>
    where
        F: FnOnce(&mut EndDevice) -> Result<R>,
    {
        let mut device = self.lock(dev_eui).await?;
        f(&mut device)
    }
}
