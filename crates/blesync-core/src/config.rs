//! Peripheral configuration

use std::time::Duration;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Timeouts and debounce window applied to every operation on a peripheral
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeripheralConfig {
    /// Bound on each wait for a connection-state event during `connect`
    pub connect_timeout: Duration,
    /// Bound on the wait for service discovery to complete
    pub discovery_timeout: Duration,
    /// Bound on characteristic and descriptor reads/writes
    pub request_timeout: Duration,
    /// Bound on a signal strength read
    pub rssi_timeout: Duration,
    /// Grace period before a notification disable is carried out
    pub disable_debounce: Duration,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            discovery_timeout: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(1000),
            rssi_timeout: Duration::from_millis(500),
            disable_debounce: Duration::from_millis(3000),
        }
    }
}

impl PeripheralConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set read/write timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set RSSI read timeout
    pub fn with_rssi_timeout(mut self, timeout: Duration) -> Self {
        self.rssi_timeout = timeout;
        self
    }

    /// Set the notification-disable grace period
    pub fn with_disable_debounce(mut self, window: Duration) -> Self {
        self.disable_debounce = window;
        self
    }
}
