//! Error types for the btleplug backend

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while locating an adapter or a peripheral
#[derive(Error, Debug)]
pub enum BtleplugTransportError {
    #[error("BLE adapter not available")]
    NoAdapters,

    #[error("Peripheral not found: {address}")]
    PeripheralNotFound { address: String },

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
}
