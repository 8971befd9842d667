//! Error types for peripheral operations

use thiserror::Error;
use uuid::Uuid;

use crate::rendezvous::OperationKind;
use crate::transport::{GattStatus, TransportError};

pub type Result<T> = std::result::Result<T, GattError>;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Failures of a single peripheral operation
///
/// None of these are fatal to the peripheral: after any failure the caller may retry,
/// or disconnect and reconnect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Unknown attribute: {uuid}")]
    UnknownAttribute { uuid: Uuid },

    #[error("Characteristic {characteristic} has no descriptor {descriptor}")]
    UnknownDescriptor { characteristic: Uuid, descriptor: Uuid },

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Discovery timeout")]
    DiscoveryTimeout,

    #[error("{kind} timed out after {duration_ms}ms")]
    Timeout {
        kind: OperationKind,
        duration_ms: u64,
    },

    #[error("{kind} failed with status {status}")]
    Status {
        kind: OperationKind,
        status: GattStatus,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Transport worker stopped")]
    WorkerStopped,

    #[error("No peripheral registered for {address}")]
    UnknownPeripheral { address: String },
}

impl GattError {
    /// Status code form of this error: the transport status verbatim when there is
    /// one, otherwise the generic failure code
    pub fn status(&self) -> GattStatus {
        match self {
            GattError::Status { status, .. } => *status,
            _ => GattStatus::FAILURE,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GattError::Timeout { .. } | GattError::ConnectionTimeout | GattError::DiscoveryTimeout
        )
    }
}
