//! Synchronous request/response layer over an asynchronous BLE GATT transport
//!
//! Radio stacks report every GATT completion through a callback stream. This crate
//! turns that stream back into ordinary call/return operations: "write this
//! characteristic and tell me it succeeded", "read this value and give me the bytes".
//! Attribute-change notifications keep flowing to subscribers while requests are in
//! flight.
//!
//! ## Architecture
//!
//! - [`rendezvous`] - one wait/signal cell per operation kind
//! - [`events`] - the single event sink a transport reports completions through
//! - [`connection`] - connection states and per-state observers
//! - [`directory`] - services and characteristics found by discovery
//! - [`subscription`] - notification callbacks and the debounced disable timer
//! - [`worker`] - the task that owns the transport, and the serialization gate
//! - [`peripheral`] - the public, timeout-bounded operations
//! - [`registry`] - an owned table of peripherals keyed by address
//! - [`blocking`] - thread-blocking facade for callers outside the runtime
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blesync_core::{Peripheral, PeripheralConfig, SerialGate};
//!
//! let peripheral = Peripheral::new("C4:BE:84:12:34:56".into(), transport,
//!     PeripheralConfig::default(), SerialGate::new());
//! peripheral.connect().await?;
//! peripheral.discover().await?;
//! peripheral.write(command_uuid, &[0x01]).await?;
//! let reply = peripheral.read(reply_uuid).await?;
//! ```
//!
//! Only one GATT operation is outstanding at a time across every peripheral sharing a
//! [`SerialGate`], matching the radio's own one-operation-per-link limit.

pub mod blocking;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod events;
pub mod peripheral;
pub mod registry;
pub mod rendezvous;
pub mod subscription;
pub mod transport;
pub mod types;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Public API exports
pub use blocking::BlockingPeripheral;
pub use config::PeripheralConfig;
pub use connection::{ConnectionState, ObserverCallback, ObserverHandle};
pub use directory::AttributeDirectory;
pub use error::{GattError, Result};
pub use events::{EventSink, TransportEvent};
pub use peripheral::Peripheral;
pub use registry::PeripheralRegistry;
pub use rendezvous::{OperationKind, RendezvousTable};
pub use subscription::NotifyCallback;
pub use transport::{
    AttributeHandle, CharacteristicInfo, DescriptorInfo, GattStatus, GattTransport, ServiceInfo,
    TransportError, CLIENT_CHARACTERISTIC_CONFIG_UUID, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};
pub use types::{Notification, PeripheralAddress, Timestamp};
pub use worker::SerialGate;
