//! Scripted transport stub for tests
//!
//! [`ScriptedTransport`] records every call and completes it asynchronously through
//! the event sink, the way a radio stack would. Writes are echoed: a later read of
//! the same characteristic returns the last written bytes. The paired
//! [`ScriptHandle`] inspects the call log and changes behaviour mid-test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::events::{EventSink, TransportEvent};
use crate::transport::{
    AttributeHandle, CharacteristicInfo, GattStatus, GattTransport, ServiceInfo, TransportError,
    CLIENT_CHARACTERISTIC_CONFIG_UUID,
};
use crate::types::PeripheralAddress;

// ----------------------------------------------------------------------------
// Call Log
// ----------------------------------------------------------------------------

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(PeripheralAddress),
    Disconnect,
    CancelDiscovery,
    RefreshCache,
    DiscoverAttributes,
    ReadAttribute(AttributeHandle),
    WriteAttribute(AttributeHandle, Vec<u8>),
    ReadDescriptor(AttributeHandle),
    WriteDescriptor(AttributeHandle, Vec<u8>),
    SetNotification(AttributeHandle, bool),
    BeginReliableWrite,
    ExecuteReliableWrite,
    ReadSignalStrength,
}

#[derive(Debug)]
struct Script {
    sink: Option<EventSink>,
    services: Vec<ServiceInfo>,
    values: HashMap<AttributeHandle, Vec<u8>>,
    calls: Vec<TransportCall>,
    connect_status: GattStatus,
    discovery_status: GattStatus,
    complete_connect: bool,
    complete_reads: bool,
    complete_writes: bool,
    scanning: bool,
    rssi: i16,
}

fn lock(script: &Mutex<Script>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Scripted Transport
// ----------------------------------------------------------------------------

/// In-memory GATT transport with scripted completions
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

/// Test-side view of a [`ScriptedTransport`]
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Transport that will report `services` on discovery
    pub fn new(services: Vec<ServiceInfo>) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script {
            sink: None,
            services,
            values: HashMap::new(),
            calls: Vec::new(),
            connect_status: GattStatus::SUCCESS,
            discovery_status: GattStatus::SUCCESS,
            complete_connect: true,
            complete_reads: true,
            complete_writes: true,
            scanning: false,
            rssi: -60,
        }));
        (
            Self {
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }

    /// Record `call`, then deliver `events` from a separate task
    fn complete(&self, call: TransportCall, events: Vec<TransportEvent>) {
        let sink = {
            let mut script = lock(&self.script);
            trace!(?call, "Scripted transport call");
            script.calls.push(call);
            script.sink.clone()
        };
        let Some(sink) = sink else {
            return;
        };
        if events.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for event in events {
                sink.deliver(event);
            }
        });
    }

    fn record(&self, call: TransportCall) {
        self.complete(call, Vec::new());
    }
}

impl GattTransport for ScriptedTransport {
    fn attach(&mut self, sink: EventSink) {
        lock(&self.script).sink = Some(sink);
    }

    fn connect(&mut self, address: &PeripheralAddress) -> Result<(), TransportError> {
        let (complete, status) = {
            let script = lock(&self.script);
            (script.complete_connect, script.connect_status)
        };
        let events = match (complete, status.is_success()) {
            (false, _) => Vec::new(),
            (true, true) => vec![
                TransportEvent::ConnectionStateChanged {
                    status,
                    state: ConnectionState::Connecting,
                },
                TransportEvent::ConnectionStateChanged {
                    status,
                    state: ConnectionState::Connected,
                },
            ],
            (true, false) => vec![TransportEvent::ConnectionStateChanged {
                status,
                state: ConnectionState::Disconnected,
            }],
        };
        self.complete(TransportCall::Connect(address.clone()), events);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.complete(
            TransportCall::Disconnect,
            vec![
                TransportEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: ConnectionState::Disconnecting,
                },
                TransportEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: ConnectionState::Disconnected,
                },
            ],
        );
        Ok(())
    }

    fn is_discovering(&self) -> bool {
        lock(&self.script).scanning
    }

    fn cancel_discovery(&mut self) -> Result<(), TransportError> {
        lock(&self.script).scanning = false;
        self.record(TransportCall::CancelDiscovery);
        Ok(())
    }

    fn refresh_cache(&mut self) -> Result<bool, TransportError> {
        self.record(TransportCall::RefreshCache);
        Ok(true)
    }

    fn discover_attributes(&mut self) -> Result<(), TransportError> {
        let status = lock(&self.script).discovery_status;
        self.complete(
            TransportCall::DiscoverAttributes,
            vec![TransportEvent::ServicesDiscovered { status }],
        );
        Ok(())
    }

    fn services(&self) -> Vec<ServiceInfo> {
        lock(&self.script).services.clone()
    }

    fn read_attribute(&mut self, handle: AttributeHandle) -> Result<(), TransportError> {
        let (complete, value) = {
            let script = lock(&self.script);
            (
                script.complete_reads,
                script.values.get(&handle).cloned().unwrap_or_default(),
            )
        };
        let events = if complete {
            vec![TransportEvent::CharacteristicRead {
                handle,
                status: GattStatus::SUCCESS,
                value: Some(value),
            }]
        } else {
            Vec::new()
        };
        self.complete(TransportCall::ReadAttribute(handle), events);
        Ok(())
    }

    fn write_attribute(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let complete = {
            let mut script = lock(&self.script);
            script.values.insert(handle, value.to_vec());
            script.complete_writes
        };
        let events = if complete {
            vec![TransportEvent::CharacteristicWrite {
                handle,
                status: GattStatus::SUCCESS,
            }]
        } else {
            Vec::new()
        };
        self.complete(TransportCall::WriteAttribute(handle, value.to_vec()), events);
        Ok(())
    }

    fn read_descriptor(&mut self, handle: AttributeHandle) -> Result<(), TransportError> {
        let value = lock(&self.script)
            .values
            .get(&handle)
            .cloned()
            .unwrap_or_default();
        self.complete(
            TransportCall::ReadDescriptor(handle),
            vec![TransportEvent::DescriptorRead {
                handle,
                status: GattStatus::SUCCESS,
                value: Some(value),
            }],
        );
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        lock(&self.script).values.insert(handle, value.to_vec());
        self.complete(
            TransportCall::WriteDescriptor(handle, value.to_vec()),
            vec![TransportEvent::DescriptorWrite {
                handle,
                status: GattStatus::SUCCESS,
            }],
        );
        Ok(())
    }

    fn set_notification_enabled(
        &mut self,
        handle: AttributeHandle,
        enable: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SetNotification(handle, enable));
        Ok(())
    }

    fn read_signal_strength(&mut self) -> Result<(), TransportError> {
        let rssi = lock(&self.script).rssi;
        self.complete(
            TransportCall::ReadSignalStrength,
            vec![TransportEvent::SignalStrengthRead {
                rssi,
                status: GattStatus::SUCCESS,
            }],
        );
        Ok(())
    }

    fn begin_reliable_write(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::BeginReliableWrite);
        Ok(())
    }

    fn execute_reliable_write(&mut self) -> Result<(), TransportError> {
        self.complete(
            TransportCall::ExecuteReliableWrite,
            vec![TransportEvent::ReliableWriteCompleted {
                status: GattStatus::SUCCESS,
            }],
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Script Handle
// ----------------------------------------------------------------------------

impl ScriptHandle {
    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.script).calls.clone()
    }

    /// Number of recorded calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        lock(&self.script).calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of descriptor writes of exactly `value`
    pub fn descriptor_writes(&self, value: &[u8]) -> usize {
        self.count(|call| matches!(call, TransportCall::WriteDescriptor(_, v) if v == value))
    }

    /// Deliver an event as if the radio produced it
    pub fn emit(&self, event: TransportEvent) {
        let sink = lock(&self.script).sink.clone();
        if let Some(sink) = sink {
            sink.deliver(event);
        }
    }

    pub fn set_connect_status(&self, status: GattStatus) {
        lock(&self.script).connect_status = status;
    }

    pub fn set_discovery_status(&self, status: GattStatus) {
        lock(&self.script).discovery_status = status;
    }

    /// Leave connect calls without a completion event
    pub fn stall_connect(&self, stall: bool) {
        lock(&self.script).complete_connect = !stall;
    }

    /// Leave read calls without a completion event
    pub fn stall_reads(&self, stall: bool) {
        lock(&self.script).complete_reads = !stall;
    }

    /// Leave write calls without a completion event
    pub fn stall_writes(&self, stall: bool) {
        lock(&self.script).complete_writes = !stall;
    }

    pub fn set_scanning(&self, scanning: bool) {
        lock(&self.script).scanning = scanning;
    }

    pub fn set_rssi(&self, rssi: i16) {
        lock(&self.script).rssi = rssi;
    }

    /// Seed the value a read of `handle` will return
    pub fn set_value(&self, handle: AttributeHandle, value: &[u8]) {
        lock(&self.script).values.insert(handle, value.to_vec());
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

/// Service and characteristic UUIDs of [`sample_services`]
pub mod sample {
    use uuid::Uuid;

    pub const SERVICE: Uuid = Uuid::from_u128(0x1BC5FFA0_0200_62AB_E411_F254E005DBD4);
    /// Readable/writable characteristic without notifications
    pub const COMMAND: Uuid = Uuid::from_u128(0x1BC5FFA1_0200_62AB_E411_F254E005DBD4);
    /// Notifying characteristic with a configuration descriptor
    pub const STREAM: Uuid = Uuid::from_u128(0x1BC5FFA2_0200_62AB_E411_F254E005DBD4);
    /// Never reported by discovery
    pub const MISSING: Uuid = Uuid::from_u128(0x1BC5FFA3_0200_62AB_E411_F254E005DBD4);
}

/// One service with a plain characteristic and a notifying one
pub fn sample_services() -> Vec<ServiceInfo> {
    vec![ServiceInfo {
        uuid: sample::SERVICE,
        handle: AttributeHandle(0x10),
        characteristics: vec![
            CharacteristicInfo::new(sample::COMMAND, AttributeHandle(0x11)),
            CharacteristicInfo::new(sample::STREAM, AttributeHandle(0x13))
                .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID, AttributeHandle(0x14)),
        ],
    }]
}

/// Handle the sample fixture assigns to `uuid`
pub fn sample_handle(uuid: Uuid) -> Option<AttributeHandle> {
    sample_services()
        .into_iter()
        .flat_map(|s| s.characteristics)
        .find(|c| c.uuid == uuid)
        .map(|c| c.handle)
}
