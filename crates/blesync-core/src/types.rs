//! Identity and payload types shared across the crate

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Peripheral Address
// ----------------------------------------------------------------------------

/// Transport-level address of a peripheral, e.g. `"C4:BE:84:12:34:56"`
///
/// Opaque to this crate; it is handed to [`crate::GattTransport::connect`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeripheralAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeripheralAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time; clamps to zero if the clock is before the epoch
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Notification
// ----------------------------------------------------------------------------

/// A pushed attribute value, as handed to a subscriber callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic that changed
    pub uuid: Uuid,
    /// When the event sink received the change
    pub timestamp: Timestamp,
    /// Private copy of the pushed bytes
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_round_trips() {
        let address = PeripheralAddress::from("C4:BE:84:12:34:56");
        assert_eq!(address.to_string(), "C4:BE:84:12:34:56");
        assert_eq!(address.as_str(), "C4:BE:84:12:34:56");
    }

    #[test]
    fn test_timestamp_now_is_after_epoch() {
        let now = Timestamp::now();
        assert!(now > Timestamp::new(0));
    }
}
