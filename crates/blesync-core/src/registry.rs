//! Owned table of peripherals keyed by address

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::PeripheralConfig;
use crate::error::{GattError, Result};
use crate::peripheral::Peripheral;
use crate::transport::GattTransport;
use crate::types::PeripheralAddress;
use crate::worker::SerialGate;

// ----------------------------------------------------------------------------
// Peripheral Registry
// ----------------------------------------------------------------------------

/// Every known peripheral, sharing one configuration and one serialization gate
///
/// Operations on peripherals of the same registry never overlap on the radio.
pub struct PeripheralRegistry {
    config: PeripheralConfig,
    gate: SerialGate,
    peripherals: DashMap<PeripheralAddress, Arc<Peripheral>>,
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::new(PeripheralConfig::default())
    }
}

impl PeripheralRegistry {
    pub fn new(config: PeripheralConfig) -> Self {
        Self {
            config,
            gate: SerialGate::new(),
            peripherals: DashMap::new(),
        }
    }

    pub fn gate(&self) -> &SerialGate {
        &self.gate
    }

    /// Peripheral for `address`, creating it over `transport` if not yet known
    ///
    /// An existing entry is returned unchanged and `transport` is dropped.
    pub fn get_or_insert<T: GattTransport>(
        &self,
        address: PeripheralAddress,
        transport: T,
    ) -> Arc<Peripheral> {
        self.peripherals
            .entry(address.clone())
            .or_insert_with(|| {
                info!(%address, "Registering peripheral");
                Arc::new(Peripheral::new(
                    address,
                    transport,
                    self.config.clone(),
                    self.gate.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, address: &PeripheralAddress) -> Option<Arc<Peripheral>> {
        self.peripherals.get(address).map(|entry| entry.clone())
    }

    /// Like [`PeripheralRegistry::get`], as an error for unknown addresses
    pub fn require(&self, address: &PeripheralAddress) -> Result<Arc<Peripheral>> {
        self.get(address).ok_or_else(|| GattError::UnknownPeripheral {
            address: address.to_string(),
        })
    }

    pub fn remove(&self, address: &PeripheralAddress) -> Option<Arc<Peripheral>> {
        self.peripherals.remove(address).map(|(_, peripheral)| peripheral)
    }

    pub fn addresses(&self) -> Vec<PeripheralAddress> {
        let mut addresses: Vec<_> = self.peripherals.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }

    pub fn connected(&self) -> Vec<Arc<Peripheral>> {
        self.peripherals
            .iter()
            .filter(|e| e.value().is_connected())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Disconnect every peripheral and empty the registry
    pub async fn shutdown(&self) {
        let peripherals: Vec<Arc<Peripheral>> =
            self.peripherals.iter().map(|e| e.value().clone()).collect();
        self.peripherals.clear();

        for peripheral in peripherals {
            if let Err(e) = peripheral.disconnect().await {
                warn!(address = %peripheral.address(), "Failed to disconnect: {}", e);
            }
        }
        info!("Peripheral registry shut down");
    }
}
