//! btleplug backend for blesync
//!
//! Implements [`blesync_core::GattTransport`] on top of a `btleplug` peripheral, so
//! the call/return adapter in `blesync-core` can drive real hardware on Linux,
//! macOS and Windows.

pub mod error;
pub mod transport;

pub use error::BtleplugTransportError;
pub use transport::{default_adapter, BtleplugTransport};
