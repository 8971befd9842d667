//! Transport event sink
//!
//! Every asynchronous completion from the transport enters through
//! [`EventSink::deliver`]. Each event kind signals exactly one rendezvous cell;
//! attribute changes are handed to subscriber callbacks on a separate task so the
//! sink never runs subscriber code itself.

use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::peripheral::PeripheralInner;
use crate::rendezvous::OperationKind;
use crate::transport::{AttributeHandle, GattStatus};
use crate::types::{Notification, Timestamp};

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Completion events a transport reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged {
        status: GattStatus,
        state: ConnectionState,
    },
    ServicesDiscovered {
        status: GattStatus,
    },
    CharacteristicRead {
        handle: AttributeHandle,
        status: GattStatus,
        value: Option<Vec<u8>>,
    },
    CharacteristicWrite {
        handle: AttributeHandle,
        status: GattStatus,
    },
    DescriptorRead {
        handle: AttributeHandle,
        status: GattStatus,
        value: Option<Vec<u8>>,
    },
    DescriptorWrite {
        handle: AttributeHandle,
        status: GattStatus,
    },
    ReliableWriteCompleted {
        status: GattStatus,
    },
    SignalStrengthRead {
        rssi: i16,
        status: GattStatus,
    },
    /// Pushed value; the radio occasionally reports a change with no payload
    AttributeChanged {
        uuid: Uuid,
        value: Option<Vec<u8>>,
    },
}

impl TransportEvent {
    /// Rendezvous cell this event completes, if any
    pub fn operation_kind(&self) -> Option<OperationKind> {
        match self {
            TransportEvent::ConnectionStateChanged { .. } => Some(OperationKind::Connection),
            TransportEvent::ServicesDiscovered { .. } => Some(OperationKind::Discovery),
            TransportEvent::CharacteristicRead { .. } => Some(OperationKind::Read),
            TransportEvent::CharacteristicWrite { .. } => Some(OperationKind::Write),
            TransportEvent::DescriptorRead { .. } => Some(OperationKind::DescriptorRead),
            TransportEvent::DescriptorWrite { .. } => Some(OperationKind::DescriptorWrite),
            TransportEvent::ReliableWriteCompleted { .. } => Some(OperationKind::ReliableWrite),
            TransportEvent::SignalStrengthRead { .. } => Some(OperationKind::SignalStrength),
            TransportEvent::AttributeChanged { .. } => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Event Sink
// ----------------------------------------------------------------------------

/// Handle a transport uses to report completions
///
/// Cheap to clone and callable from any thread. Holds the peripheral weakly: events
/// arriving after the peripheral was dropped are discarded.
#[derive(Clone)]
pub struct EventSink {
    peripheral: Weak<PeripheralInner>,
}

impl EventSink {
    pub(crate) fn new(peripheral: Weak<PeripheralInner>) -> Self {
        Self { peripheral }
    }

    /// Route one transport event; never fails and never blocks on subscriber code
    pub fn deliver(&self, event: TransportEvent) {
        let Some(inner) = self.peripheral.upgrade() else {
            trace!(?event, "Dropping event for released peripheral");
            return;
        };

        match event {
            TransportEvent::ConnectionStateChanged { status, state } => {
                debug!(%state, %status, "GATT event: connection state");
                inner
                    .rendezvous
                    .signal_with(OperationKind::Connection, status, || {
                        inner.set_state(state);
                        inner.observers.dispatch(state, &inner.runtime);
                    });
            }
            TransportEvent::ServicesDiscovered { status } => {
                debug!(%status, "GATT event: discover");
                inner.rendezvous.signal(OperationKind::Discovery, status);
            }
            TransportEvent::CharacteristicRead {
                handle,
                status,
                value,
            } => {
                debug!(%handle, %status, "GATT event: read");
                inner.rendezvous.signal_with(OperationKind::Read, status, || {
                    if let (true, Some(value)) = (status.is_success(), value) {
                        inner.directory().record_value(handle, value);
                    }
                });
            }
            TransportEvent::CharacteristicWrite { handle, status } => {
                debug!(%handle, %status, "GATT event: write");
                inner.rendezvous.signal(OperationKind::Write, status);
            }
            TransportEvent::DescriptorRead {
                handle,
                status,
                value,
            } => {
                debug!(%handle, %status, "GATT event: descriptor read");
                inner
                    .rendezvous
                    .signal_with(OperationKind::DescriptorRead, status, || {
                        if let (true, Some(value)) = (status.is_success(), value) {
                            inner.directory().record_descriptor_value(handle, value);
                        }
                    });
            }
            TransportEvent::DescriptorWrite { handle, status } => {
                debug!(%handle, %status, "GATT event: descriptor write");
                inner
                    .rendezvous
                    .signal(OperationKind::DescriptorWrite, status);
            }
            TransportEvent::ReliableWriteCompleted { status } => {
                debug!(%status, "GATT event: reliable write");
                inner.rendezvous.signal(OperationKind::ReliableWrite, status);
            }
            TransportEvent::SignalStrengthRead { rssi, status } => {
                debug!(rssi, %status, "GATT event: rssi");
                inner
                    .rendezvous
                    .signal_with(OperationKind::SignalStrength, status, || {
                        inner.set_rssi(rssi);
                    });
            }
            TransportEvent::AttributeChanged { uuid, value } => {
                debug!(%uuid, "GATT event: characteristic changed");
                let Some(payload) = value else {
                    warn!(%uuid, "Characteristic change reported without a value");
                    return;
                };
                self.notify_subscriber(&inner, uuid, payload);
            }
        }
    }

    fn notify_subscriber(&self, inner: &Arc<PeripheralInner>, uuid: Uuid, payload: Vec<u8>) {
        inner.directory().set_value(&uuid, payload.clone());

        let Some(callback) = inner.subscriptions.callback(&uuid) else {
            trace!(%uuid, "No subscriber for pushed value");
            return;
        };

        let notification = Notification {
            uuid,
            timestamp: Timestamp::now(),
            payload,
        };
        trace!(%uuid, payload = %hex::encode(&notification.payload), "Dispatching notification");
        inner.runtime.spawn(async move {
            callback(notification);
        });
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &(self.peripheral.strong_count() > 0))
            .finish()
    }
}
