//! [`GattTransport`] over a btleplug peripheral
//!
//! btleplug exposes async calls; every transport method spawns the call on the
//! current runtime and reports its outcome through the event sink. btleplug has no
//! attribute handles, so handles are assigned in discovery order when a discovery
//! pass completes. Writes to a configuration descriptor are translated into
//! subscribe/unsubscribe calls, since btleplug manages that descriptor itself.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use blesync_core::{
    AttributeHandle, CharacteristicInfo, ConnectionState, EventSink, GattStatus, GattTransport,
    PeripheralAddress, ServiceInfo, TransportError, TransportEvent,
    CLIENT_CHARACTERISTIC_CONFIG_UUID,
};
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Descriptor, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::BtleplugTransportError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// Adapter Lookup
// ----------------------------------------------------------------------------

/// First adapter reported by the platform
pub async fn default_adapter() -> Result<Adapter, BtleplugTransportError> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(BtleplugTransportError::NoAdapters)?;
    info!("BLE adapter initialized");
    Ok(adapter)
}

fn matches_address(peripheral: &Peripheral, address: &PeripheralAddress) -> bool {
    peripheral
        .address()
        .to_string()
        .eq_ignore_ascii_case(address.as_str())
        || peripheral.id().to_string().eq_ignore_ascii_case(address.as_str())
}

// ----------------------------------------------------------------------------
// Attribute Table
// ----------------------------------------------------------------------------

/// Discovery snapshot with the handles assigned to it
#[derive(Debug, Default, Clone)]
struct AttributeTable {
    services: Vec<ServiceInfo>,
    characteristics: HashMap<AttributeHandle, Characteristic>,
    descriptors: HashMap<AttributeHandle, (Characteristic, Descriptor)>,
}

/// Number services, characteristics and descriptors consecutively from 1
fn assign_handles(services: &BTreeSet<Service>) -> AttributeTable {
    let mut table = AttributeTable::default();
    let mut next = 0u32;
    let mut allocate = || {
        next += 1;
        AttributeHandle(next)
    };

    for service in services {
        let mut info = ServiceInfo {
            uuid: service.uuid,
            handle: allocate(),
            characteristics: Vec::with_capacity(service.characteristics.len()),
        };

        for characteristic in &service.characteristics {
            let mut char_info = CharacteristicInfo::new(characteristic.uuid, allocate());
            table
                .characteristics
                .insert(char_info.handle, characteristic.clone());

            for descriptor in &characteristic.descriptors {
                let handle = allocate();
                char_info = char_info.with_descriptor(descriptor.uuid, handle);
                table
                    .descriptors
                    .insert(handle, (characteristic.clone(), descriptor.clone()));
            }
            info.characteristics.push(char_info);
        }
        table.services.push(info);
    }
    table
}

/// Subscription requested by a configuration descriptor value, if it is one
fn requested_subscription(value: &[u8]) -> Option<bool> {
    value.first().map(|flags| flags & 0x03 != 0)
}

fn write_type_for(characteristic: &Characteristic) -> WriteType {
    if characteristic.properties.contains(CharPropFlags::WRITE) {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    }
}

fn status_of<T>(result: &btleplug::Result<T>) -> GattStatus {
    match result {
        Ok(_) => GattStatus::SUCCESS,
        Err(_) => GattStatus::FAILURE,
    }
}

// ----------------------------------------------------------------------------
// Btleplug Transport
// ----------------------------------------------------------------------------

/// GATT transport bound to one btleplug peripheral
pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    sink: Option<EventSink>,
    attributes: Arc<Mutex<AttributeTable>>,
    scanning: Arc<AtomicBool>,
    notification_forwarder: Option<JoinHandle<()>>,
    link_watcher: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            sink: None,
            attributes: Arc::new(Mutex::new(AttributeTable::default())),
            scanning: Arc::new(AtomicBool::new(false)),
            notification_forwarder: None,
            link_watcher: None,
        }
    }

    /// Scan on `adapter` until a peripheral with `address` shows up
    ///
    /// The scan is left running; connecting through the returned transport stops it.
    pub async fn find(
        adapter: &Adapter,
        address: &PeripheralAddress,
        scan_timeout: Duration,
    ) -> Result<Self, BtleplugTransportError> {
        adapter.start_scan(ScanFilter::default()).await?;
        info!(%address, "Scanning for peripheral");

        let deadline = Instant::now() + scan_timeout;
        loop {
            for peripheral in adapter.peripherals().await? {
                if matches_address(&peripheral, address) {
                    debug!(%address, id = %peripheral.id(), "Found peripheral");
                    let transport = Self::new(adapter.clone(), peripheral);
                    transport.scanning.store(true, Ordering::SeqCst);
                    return Ok(transport);
                }
            }

            if Instant::now() >= deadline {
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
                return Err(BtleplugTransportError::PeripheralNotFound {
                    address: address.to_string(),
                });
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn attributes(&self) -> MutexGuard<'_, AttributeTable> {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self, operation: &'static str) -> Result<EventSink, TransportError> {
        self.sink
            .clone()
            .ok_or(TransportError::Rejected { operation })
    }

    /// Run `call` on the runtime and deliver the event it resolves to
    fn spawn_call<F>(&self, operation: &'static str, call: F) -> Result<(), TransportError>
    where
        F: Future<Output = TransportEvent> + Send + 'static,
    {
        let sink = self.sink(operation)?;
        tokio::spawn(async move {
            sink.deliver(call.await);
        });
        Ok(())
    }

    fn characteristic(&self, handle: AttributeHandle) -> Result<Characteristic, TransportError> {
        self.attributes()
            .characteristics
            .get(&handle)
            .cloned()
            .ok_or(TransportError::UnknownHandle(handle))
    }

    fn descriptor(
        &self,
        handle: AttributeHandle,
    ) -> Result<(Characteristic, Descriptor), TransportError> {
        self.attributes()
            .descriptors
            .get(&handle)
            .cloned()
            .ok_or(TransportError::UnknownHandle(handle))
    }

    fn start_notification_forwarder(&mut self, sink: EventSink) {
        if let Some(previous) = self.notification_forwarder.take() {
            previous.abort();
        }
        let peripheral = self.peripheral.clone();
        self.notification_forwarder = Some(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };
            while let Some(data) = notifications.next().await {
                sink.deliver(TransportEvent::AttributeChanged {
                    uuid: data.uuid,
                    value: Some(data.value),
                });
            }
            debug!("Notification stream ended");
        }));
    }
}

impl GattTransport for BtleplugTransport {
    fn attach(&mut self, sink: EventSink) {
        let adapter = self.adapter.clone();
        let id = self.peripheral.id();
        let watcher_sink = sink.clone();
        self.link_watcher = Some(tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to get BLE events: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(peer) = event {
                    if peer == id {
                        debug!(%peer, "Link dropped");
                        watcher_sink.deliver(TransportEvent::ConnectionStateChanged {
                            status: GattStatus::FAILURE,
                            state: ConnectionState::Disconnected,
                        });
                    }
                }
            }
        }));
        self.sink = Some(sink);
    }

    fn connect(&mut self, address: &PeripheralAddress) -> Result<(), TransportError> {
        let sink = self.sink("connect")?;
        trace!(%address, "btleplug connect");
        sink.deliver(TransportEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Connecting,
        });

        let peripheral = self.peripheral.clone();
        let connected = async move {
            match peripheral.connect().await {
                Ok(()) => TransportEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: ConnectionState::Connected,
                },
                Err(e) => {
                    warn!("Connection failed: {}", e);
                    TransportEvent::ConnectionStateChanged {
                        status: GattStatus::FAILURE,
                        state: ConnectionState::Disconnected,
                    }
                }
            }
        };
        self.spawn_call("connect", connected)?;
        self.start_notification_forwarder(sink);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let sink = self.sink("disconnect")?;
        sink.deliver(TransportEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Disconnecting,
        });
        if let Some(forwarder) = self.notification_forwarder.take() {
            forwarder.abort();
        }

        let peripheral = self.peripheral.clone();
        self.spawn_call("disconnect", async move {
            let result = peripheral.disconnect().await;
            if let Err(e) = &result {
                warn!("Disconnect reported an error: {}", e);
            }
            TransportEvent::ConnectionStateChanged {
                status: status_of(&result),
                state: ConnectionState::Disconnected,
            }
        })
    }

    fn is_discovering(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn cancel_discovery(&mut self) -> Result<(), TransportError> {
        self.scanning.store(false, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
        Ok(())
    }

    fn discover_attributes(&mut self) -> Result<(), TransportError> {
        let peripheral = self.peripheral.clone();
        let attributes = self.attributes.clone();
        self.spawn_call("discover", async move {
            let result = peripheral.discover_services().await;
            match &result {
                Ok(()) => {
                    let table = assign_handles(&peripheral.services());
                    debug!(services = table.services.len(), "Assigned attribute handles");
                    *attributes.lock().unwrap_or_else(PoisonError::into_inner) = table;
                }
                Err(e) => error!("Failed to discover services: {}", e),
            }
            TransportEvent::ServicesDiscovered {
                status: status_of(&result),
            }
        })
    }

    fn services(&self) -> Vec<ServiceInfo> {
        self.attributes().services.clone()
    }

    fn read_attribute(&mut self, handle: AttributeHandle) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        let peripheral = self.peripheral.clone();
        self.spawn_call("read", async move {
            let result = peripheral.read(&characteristic).await;
            TransportEvent::CharacteristicRead {
                handle,
                status: status_of(&result),
                value: result.ok(),
            }
        })
    }

    fn write_attribute(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        let peripheral = self.peripheral.clone();
        let value = value.to_vec();
        self.spawn_call("write", async move {
            let write_type = write_type_for(&characteristic);
            let result = peripheral.write(&characteristic, &value, write_type).await;
            if let Err(e) = &result {
                warn!(uuid = %characteristic.uuid, "Failed to write to characteristic: {}", e);
            }
            TransportEvent::CharacteristicWrite {
                handle,
                status: status_of(&result),
            }
        })
    }

    fn read_descriptor(&mut self, handle: AttributeHandle) -> Result<(), TransportError> {
        let (_, descriptor) = self.descriptor(handle)?;
        let peripheral = self.peripheral.clone();
        self.spawn_call("descriptor read", async move {
            let result = peripheral.read_descriptor(&descriptor).await;
            TransportEvent::DescriptorRead {
                handle,
                status: status_of(&result),
                value: result.ok(),
            }
        })
    }

    fn write_descriptor(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let (characteristic, descriptor) = self.descriptor(handle)?;
        let peripheral = self.peripheral.clone();
        let value = value.to_vec();

        let subscription = if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIG_UUID {
            requested_subscription(&value)
        } else {
            None
        };

        self.spawn_call("descriptor write", async move {
            let result = match subscription {
                Some(true) => peripheral.subscribe(&characteristic).await,
                Some(false) => peripheral.unsubscribe(&characteristic).await,
                None => peripheral.write_descriptor(&descriptor, &value).await,
            };
            if let Err(e) = &result {
                warn!(uuid = %descriptor.uuid, "Failed to write descriptor: {}", e);
            }
            TransportEvent::DescriptorWrite {
                handle,
                status: status_of(&result),
            }
        })
    }

    fn set_notification_enabled(
        &mut self,
        handle: AttributeHandle,
        enable: bool,
    ) -> Result<(), TransportError> {
        // btleplug routes every subscribed characteristic into one stream
        self.characteristic(handle)?;
        trace!(%handle, enable, "Notification routing is implicit");
        Ok(())
    }

    fn read_signal_strength(&mut self) -> Result<(), TransportError> {
        let peripheral = self.peripheral.clone();
        self.spawn_call("signal strength read", async move {
            match peripheral.properties().await {
                Ok(Some(properties)) => match properties.rssi {
                    Some(rssi) => TransportEvent::SignalStrengthRead {
                        rssi,
                        status: GattStatus::SUCCESS,
                    },
                    None => TransportEvent::SignalStrengthRead {
                        rssi: 0,
                        status: GattStatus::FAILURE,
                    },
                },
                Ok(None) | Err(_) => TransportEvent::SignalStrengthRead {
                    rssi: 0,
                    status: GattStatus::FAILURE,
                },
            }
        })
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(forwarder) = self.notification_forwarder.take() {
            forwarder.abort();
        }
        if let Some(watcher) = self.link_watcher.take() {
            watcher.abort();
        }
    }
}
