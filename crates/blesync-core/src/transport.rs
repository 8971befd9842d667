//! The radio-facing collaborator and the attribute shapes it reports

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::events::EventSink;
use crate::types::PeripheralAddress;

// ----------------------------------------------------------------------------
// GATT Constants
// ----------------------------------------------------------------------------

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// CCCD value that turns notifications on
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value that turns notifications and indications off
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

// ----------------------------------------------------------------------------
// Status and Handles
// ----------------------------------------------------------------------------

/// Completion status reported by the transport; zero is success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);
    /// Generic failure, also used for timeouts and rejected submissions
    pub const FAILURE: GattStatus = GattStatus(-1);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    pub fn code(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-assigned handle of a service, characteristic or descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeHandle(pub u32);

impl fmt::Display for AttributeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Discovered Attributes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
    pub descriptors: Vec<DescriptorInfo>,
}

impl CharacteristicInfo {
    pub fn new(uuid: Uuid, handle: AttributeHandle) -> Self {
        Self {
            uuid,
            handle,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, uuid: Uuid, handle: AttributeHandle) -> Self {
        self.descriptors.push(DescriptorInfo { uuid, handle });
        self
    }
}

/// One service as reported by a completed discovery pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub handle: AttributeHandle,
    pub characteristics: Vec<CharacteristicInfo>,
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Errors raised while submitting a call to the transport
///
/// These cover the submission only. The outcome of an accepted call arrives later
/// as a [`crate::TransportEvent`] carrying a [`GattStatus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport rejected {operation}")]
    Rejected { operation: &'static str },

    #[error("Unknown attribute handle {0}")]
    UnknownHandle(AttributeHandle),

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("Transport backend error: {0}")]
    Backend(String),
}

/// Callback-driven GATT link to a single peripheral
///
/// Every method only *starts* an operation and must return promptly. Completion is
/// reported later, from any thread, by delivering exactly one matching
/// [`crate::TransportEvent`] to the sink passed to [`GattTransport::attach`]. The
/// transport is owned by a single worker task, so calls never overlap.
pub trait GattTransport: Send + 'static {
    /// Register the event sink; called once before any other method
    fn attach(&mut self, sink: EventSink);

    fn connect(&mut self, address: &PeripheralAddress) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Whether the adapter is running a passive scan
    fn is_discovering(&self) -> bool {
        false
    }

    /// Stop the adapter-wide scan so connection setup gets radio airtime
    fn cancel_discovery(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Drop any cached attribute table for this link; returns whether a cache was cleared
    fn refresh_cache(&mut self) -> Result<bool, TransportError> {
        Ok(false)
    }

    fn discover_attributes(&mut self) -> Result<(), TransportError>;

    /// Attribute table found by the last completed discovery
    fn services(&self) -> Vec<ServiceInfo>;

    fn read_attribute(&mut self, handle: AttributeHandle) -> Result<(), TransportError>;

    fn write_attribute(&mut self, handle: AttributeHandle, value: &[u8])
        -> Result<(), TransportError>;

    fn read_descriptor(&mut self, handle: AttributeHandle) -> Result<(), TransportError>;

    fn write_descriptor(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Local routing switch for pushed values; completes synchronously
    fn set_notification_enabled(
        &mut self,
        handle: AttributeHandle,
        enable: bool,
    ) -> Result<(), TransportError>;

    fn read_signal_strength(&mut self) -> Result<(), TransportError>;

    fn begin_reliable_write(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("reliable write"))
    }

    fn execute_reliable_write(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("reliable write"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(GattStatus::SUCCESS.is_success());
        assert!(!GattStatus::FAILURE.is_success());
        assert!(!GattStatus(133).is_success());
        assert_eq!(GattStatus(133).code(), 133);
    }

    #[test]
    fn test_cccd_uuid_is_the_bluetooth_base_form() {
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(AttributeHandle(0x2a).to_string(), "0x002a");
    }
}
