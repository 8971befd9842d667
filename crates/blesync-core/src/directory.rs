//! Services and characteristics found by the last discovery pass
//!
//! The directory is replaced wholesale after each successful discovery. Between
//! discoveries only the cached attribute values change.

use std::collections::HashMap;

use uuid::Uuid;

use crate::transport::{
    AttributeHandle, ServiceInfo, CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE,
};

// ----------------------------------------------------------------------------
// Directory Entries
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
    pub characteristics: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
    /// Last value read from or written to the descriptor
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicEntry {
    pub uuid: Uuid,
    pub service: Uuid,
    pub handle: AttributeHandle,
    /// Last value read from, written to, or pushed by the characteristic
    pub value: Vec<u8>,
    pub descriptors: HashMap<Uuid, DescriptorEntry>,
}

// ----------------------------------------------------------------------------
// Attribute Directory
// ----------------------------------------------------------------------------

/// Flat lookup table from attribute UUID to transport handle and cached value
#[derive(Debug, Default, Clone)]
pub struct AttributeDirectory {
    services: HashMap<Uuid, ServiceEntry>,
    characteristics: HashMap<Uuid, CharacteristicEntry>,
    by_handle: HashMap<AttributeHandle, Uuid>,
}

impl AttributeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole directory with a fresh discovery result
    pub fn replace(&mut self, services: Vec<ServiceInfo>) {
        self.services.clear();
        self.characteristics.clear();
        self.by_handle.clear();

        for service in services {
            let mut characteristic_uuids = Vec::with_capacity(service.characteristics.len());
            for characteristic in service.characteristics {
                let descriptors = characteristic
                    .descriptors
                    .into_iter()
                    .map(|descriptor| {
                        (
                            descriptor.uuid,
                            DescriptorEntry {
                                uuid: descriptor.uuid,
                                handle: descriptor.handle,
                                value: Vec::new(),
                            },
                        )
                    })
                    .collect();

                characteristic_uuids.push(characteristic.uuid);
                self.by_handle
                    .insert(characteristic.handle, characteristic.uuid);
                self.characteristics.insert(
                    characteristic.uuid,
                    CharacteristicEntry {
                        uuid: characteristic.uuid,
                        service: service.uuid,
                        handle: characteristic.handle,
                        value: Vec::new(),
                        descriptors,
                    },
                );
            }

            self.services.insert(
                service.uuid,
                ServiceEntry {
                    uuid: service.uuid,
                    handle: service.handle,
                    characteristics: characteristic_uuids,
                },
            );
        }
    }

    /// Handle of a service or characteristic
    pub fn lookup(&self, uuid: &Uuid) -> Option<AttributeHandle> {
        self.characteristics
            .get(uuid)
            .map(|c| c.handle)
            .or_else(|| self.services.get(uuid).map(|s| s.handle))
    }

    pub fn service(&self, uuid: &Uuid) -> Option<&ServiceEntry> {
        self.services.get(uuid)
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicEntry> {
        self.characteristics.get(uuid)
    }

    pub fn descriptor(&self, characteristic: &Uuid, descriptor: &Uuid) -> Option<&DescriptorEntry> {
        self.characteristics
            .get(characteristic)
            .and_then(|c| c.descriptors.get(descriptor))
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.characteristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Cached value of a characteristic
    pub fn value(&self, uuid: &Uuid) -> Option<Vec<u8>> {
        self.characteristics.get(uuid).map(|c| c.value.clone())
    }

    /// Set the cached (pending) value of a characteristic; returns false if unknown
    pub fn set_value(&mut self, uuid: &Uuid, value: Vec<u8>) -> bool {
        match self.characteristics.get_mut(uuid) {
            Some(characteristic) => {
                characteristic.value = value;
                true
            }
            None => false,
        }
    }

    /// Record a value the transport produced for a characteristic handle
    pub fn record_value(&mut self, handle: AttributeHandle, value: Vec<u8>) -> Option<Uuid> {
        let uuid = *self.by_handle.get(&handle)?;
        self.set_value(&uuid, value);
        Some(uuid)
    }

    pub fn set_descriptor_value(
        &mut self,
        characteristic: &Uuid,
        descriptor: &Uuid,
        value: Vec<u8>,
    ) -> bool {
        match self
            .characteristics
            .get_mut(characteristic)
            .and_then(|c| c.descriptors.get_mut(descriptor))
        {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }

    /// Record a value the transport produced for a descriptor handle
    pub fn record_descriptor_value(&mut self, handle: AttributeHandle, value: Vec<u8>) -> bool {
        for characteristic in self.characteristics.values_mut() {
            if let Some(entry) = characteristic
                .descriptors
                .values_mut()
                .find(|d| d.handle == handle)
            {
                entry.value = value;
                return true;
            }
        }
        false
    }

    /// Whether the cached CCCD value of `uuid` has notifications on
    ///
    /// `None` if the characteristic is unknown or has no configuration descriptor.
    pub fn notification_enabled(&self, uuid: &Uuid) -> Option<bool> {
        self.descriptor(uuid, &CLIENT_CHARACTERISTIC_CONFIG_UUID)
            .map(|cccd| cccd.value.as_slice() == ENABLE_NOTIFICATION_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CharacteristicInfo, DISABLE_NOTIFICATION_VALUE};

    const SERVICE: Uuid = Uuid::from_u128(0x1BC5FFA0_0200_62AB_E411_F254E005DBD4);
    const CHAR_A: Uuid = Uuid::from_u128(0x1BC5FFA1_0200_62AB_E411_F254E005DBD4);
    const CHAR_B: Uuid = Uuid::from_u128(0x1BC5FFA2_0200_62AB_E411_F254E005DBD4);
    const MISSING: Uuid = Uuid::from_u128(0x1BC5FFA9_0200_62AB_E411_F254E005DBD4);

    fn sample_services() -> Vec<ServiceInfo> {
        vec![ServiceInfo {
            uuid: SERVICE,
            handle: AttributeHandle(1),
            characteristics: vec![
                CharacteristicInfo::new(CHAR_A, AttributeHandle(2))
                    .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID, AttributeHandle(3)),
                CharacteristicInfo::new(CHAR_B, AttributeHandle(4)),
            ],
        }]
    }

    #[test]
    fn test_lookup_after_replace() {
        let mut directory = AttributeDirectory::new();
        directory.replace(sample_services());

        assert_eq!(directory.lookup(&CHAR_A), Some(AttributeHandle(2)));
        assert_eq!(directory.lookup(&CHAR_B), Some(AttributeHandle(4)));
        assert_eq!(directory.lookup(&SERVICE), Some(AttributeHandle(1)));
        assert_eq!(directory.lookup(&MISSING), None);
        assert_eq!(directory.service(&SERVICE).unwrap().characteristics.len(), 2);
    }

    #[test]
    fn test_replace_drops_stale_entries() {
        let mut directory = AttributeDirectory::new();
        directory.replace(sample_services());
        directory.replace(vec![ServiceInfo {
            uuid: SERVICE,
            handle: AttributeHandle(1),
            characteristics: vec![CharacteristicInfo::new(CHAR_B, AttributeHandle(4))],
        }]);

        assert_eq!(directory.lookup(&CHAR_A), None);
        assert_eq!(directory.characteristic_count(), 1);
        assert!(directory.record_value(AttributeHandle(2), vec![1]).is_none());
    }

    #[test]
    fn test_record_value_by_handle() {
        let mut directory = AttributeDirectory::new();
        directory.replace(sample_services());

        assert_eq!(directory.record_value(AttributeHandle(4), vec![9, 8]), Some(CHAR_B));
        assert_eq!(directory.value(&CHAR_B), Some(vec![9, 8]));
    }

    #[test]
    fn test_notification_flag_follows_cccd_cache() {
        let mut directory = AttributeDirectory::new();
        directory.replace(sample_services());

        assert_eq!(directory.notification_enabled(&CHAR_A), Some(false));
        assert_eq!(directory.notification_enabled(&CHAR_B), None);

        directory.set_descriptor_value(
            &CHAR_A,
            &CLIENT_CHARACTERISTIC_CONFIG_UUID,
            ENABLE_NOTIFICATION_VALUE.to_vec(),
        );
        assert_eq!(directory.notification_enabled(&CHAR_A), Some(true));

        assert!(directory
            .record_descriptor_value(AttributeHandle(3), DISABLE_NOTIFICATION_VALUE.to_vec()));
        assert_eq!(directory.notification_enabled(&CHAR_A), Some(false));
    }
}
