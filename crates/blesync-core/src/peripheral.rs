//! Timeout-bounded GATT operations on one peripheral
//!
//! Each operation submits a transport call through the worker while holding the
//! [`SerialGate`], then waits on the rendezvous cell of its kind until the event
//! sink reports completion or the configured timeout elapses. A timed-out call is
//! not aborted; its late completion is absorbed by the next wait of that kind.

use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PeripheralConfig;
use crate::connection::{ConnectionState, ObserverCallback, ObserverHandle, ObserverTable};
use crate::directory::AttributeDirectory;
use crate::error::{GattError, Result};
use crate::events::EventSink;
use crate::rendezvous::{OperationKind, RendezvousTable};
use crate::subscription::{NotifyCallback, SubscriptionTable};
use crate::transport::{
    AttributeHandle, GattTransport, TransportError, CLIENT_CHARACTERISTIC_CONFIG_UUID,
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::types::PeripheralAddress;
use crate::worker::{SerialGate, TransportWorker};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// State shared between the public handle, the event sink and background timers
pub(crate) struct PeripheralInner {
    pub(crate) address: PeripheralAddress,
    pub(crate) config: PeripheralConfig,
    pub(crate) gate: SerialGate,
    pub(crate) worker: TransportWorker,
    pub(crate) runtime: Handle,
    pub(crate) rendezvous: RendezvousTable,
    pub(crate) observers: Arc<ObserverTable>,
    pub(crate) subscriptions: SubscriptionTable,
    state: Mutex<ConnectionState>,
    directory: Mutex<AttributeDirectory>,
    rssi: AtomicI32,
}

impl PeripheralInner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn directory(&self) -> MutexGuard<'_, AttributeDirectory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_rssi(&self, rssi: i16) {
        self.rssi.store(i32::from(rssi), Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Handle of a discovered characteristic; services are not request targets
    fn handle_of(&self, uuid: &Uuid) -> Result<AttributeHandle> {
        self.directory()
            .characteristic(uuid)
            .map(|c| c.handle)
            .ok_or(GattError::UnknownAttribute { uuid: *uuid })
    }

    /// Wait on `kind` and map the outcome: timeout and non-zero status are errors
    async fn complete(&self, kind: OperationKind, timeout: Duration) -> Result<()> {
        match self.rendezvous.wait(kind, Some(timeout)).await {
            None => {
                warn!(address = %self.address, %kind, "Operation timed out");
                Err(GattError::Timeout {
                    kind,
                    duration_ms: timeout.as_millis() as u64,
                })
            }
            Some(status) if !status.is_success() => Err(GattError::Status { kind, status }),
            Some(_) => Ok(()),
        }
    }

    /// Bring the CCCD of `uuid` to `enable`, skipping the write if the cached value
    /// already matches
    ///
    /// A deferred disable passes the generation it was armed at as `claim`; it is
    /// claimed only once the gate is held, so a call that lands while it waits for
    /// the gate still pre-empts it.
    async fn write_notification_config(
        &self,
        uuid: Uuid,
        enable: bool,
        claim: Option<u64>,
    ) -> Result<()> {
        let handle = self.handle_of(&uuid)?;
        let cccd = self
            .directory()
            .descriptor(&uuid, &CLIENT_CHARACTERISTIC_CONFIG_UUID)
            .map(|d| d.handle)
            .ok_or(GattError::UnknownDescriptor {
                characteristic: uuid,
                descriptor: CLIENT_CHARACTERISTIC_CONFIG_UUID,
            })?;

        let _gate = self.gate.acquire().await;

        if let Some(generation) = claim {
            if !self.subscriptions.begin_disable(&uuid, generation) {
                debug!(%uuid, "Notification disable pre-empted");
                return Ok(());
            }
        }

        let current = self.directory().notification_enabled(&uuid).unwrap_or(false);
        if current == enable {
            debug!(%uuid, enable, "Notification already in requested state");
            return Ok(());
        }

        let value = if enable {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        };
        self.directory()
            .set_descriptor_value(&uuid, &CLIENT_CHARACTERISTIC_CONFIG_UUID, value.to_vec());

        debug!(%uuid, enable, "DWRITE");
        let submitted = self
            .worker
            .call(move |transport| {
                transport.set_notification_enabled(handle, enable)?;
                transport.write_descriptor(cccd, &value)
            })
            .await?;
        submitted?;

        self.complete(OperationKind::DescriptorWrite, self.config.request_timeout)
            .await
    }
}

// ----------------------------------------------------------------------------
// Peripheral
// ----------------------------------------------------------------------------

/// A GATT peripheral with call/return semantics over a callback-driven transport
pub struct Peripheral {
    inner: Arc<PeripheralInner>,
    worker_task: JoinHandle<()>,
}

impl Peripheral {
    /// Create a peripheral and start the worker task that owns `transport`
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<T: GattTransport>(
        address: PeripheralAddress,
        transport: T,
        config: PeripheralConfig,
        gate: SerialGate,
    ) -> Self {
        let runtime = Handle::current();
        let (worker, jobs) = TransportWorker::new();

        let inner = Arc::new(PeripheralInner {
            address: address.clone(),
            config,
            gate,
            worker,
            runtime: runtime.clone(),
            rendezvous: RendezvousTable::new(),
            observers: Arc::new(ObserverTable::new()),
            subscriptions: SubscriptionTable::new(),
            state: Mutex::new(ConnectionState::Disconnected),
            directory: Mutex::new(AttributeDirectory::new()),
            rssi: AtomicI32::new(0),
        });

        let sink = EventSink::new(Arc::downgrade(&inner));
        let worker_task = runtime.spawn(jobs.run(address, Box::new(transport), sink));

        Self { inner, worker_task }
    }

    pub fn address(&self) -> &PeripheralAddress {
        &self.inner.address
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.inner.config
    }

    /// Sink for injecting events, as the transport would
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(Arc::downgrade(&self.inner))
    }

    pub fn rendezvous(&self) -> &RendezvousTable {
        &self.inner.rendezvous
    }

    pub fn is_worker_running(&self) -> bool {
        !self.worker_task.is_finished()
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// True while disconnected or on the way there
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        )
    }

    /// Connect and wait until the link is up
    ///
    /// Returns at once if already connected or connecting. Each wait for a
    /// connection event is bounded by `connect_timeout`; transient states are
    /// waited through.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() || self.is_connecting() {
            return Ok(());
        }

        {
            let _gate = self.inner.gate.acquire().await;
            let address = self.inner.address.clone();
            let submitted = self
                .inner
                .worker
                .call(move |transport| -> std::result::Result<(), TransportError> {
                    if transport.is_discovering() {
                        error!(%address, "Connecting while the adapter is scanning, cancelling scan");
                        if let Err(e) = transport.cancel_discovery() {
                            warn!(%address, "Failed to cancel scan: {}", e);
                        }
                    }
                    debug!(%address, "CONNECT");
                    transport.connect(&address)?;
                    match transport.refresh_cache() {
                        Ok(true) => debug!(%address, "Cleared cached attribute table"),
                        Ok(false) => {}
                        Err(e) => warn!(%address, "Unable to clear attribute cache: {}", e),
                    }
                    Ok(())
                })
                .await?;
            submitted?;
        }

        while !self.is_connected() {
            match self
                .inner
                .rendezvous
                .wait(OperationKind::Connection, Some(self.inner.config.connect_timeout))
                .await
            {
                None => {
                    error!(address = %self.inner.address, "Connection timed out");
                    return Err(GattError::ConnectionTimeout);
                }
                Some(status) if !status.is_success() => {
                    error!(address = %self.inner.address, %status, "Connection failed");
                    return Err(GattError::Status {
                        kind: OperationKind::Connection,
                        status,
                    });
                }
                Some(_) => {}
            }
        }

        info!(address = %self.inner.address, "Connected");
        Ok(())
    }

    /// Disconnect and wait, without bound, until the link is down
    pub async fn disconnect(&self) -> Result<()> {
        if self.is_disconnected() {
            debug!(address = %self.inner.address, "Already disconnected");
            return Ok(());
        }

        let _gate = self.inner.gate.acquire().await;
        debug!(address = %self.inner.address, "DISCONNECT");
        self.inner
            .worker
            .call(|transport| transport.disconnect())
            .await??;

        while self.state() != ConnectionState::Disconnected {
            self.inner
                .rendezvous
                .wait(OperationKind::Connection, None)
                .await;
        }

        info!(address = %self.inner.address, "Disconnected");
        Ok(())
    }

    /// Register `callback` to run each time the peripheral enters `state`
    pub fn add_connection_observer(
        &self,
        state: ConnectionState,
        callback: ObserverCallback,
    ) -> ObserverHandle {
        self.inner.observers.add(state, callback)
    }

    /// Remove an observer; returns whether it was registered
    pub fn cancel_connection_observer(&self, handle: ObserverHandle) -> bool {
        self.inner.observers.cancel(handle)
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Discover services and rebuild the attribute directory
    #[track_caller]
    pub fn discover(&self) -> impl Future<Output = Result<()>> + '_ {
        let caller = Location::caller();
        async move {
            self.ensure_connected("discover", caller)?;

            {
                let _gate = self.inner.gate.acquire().await;
                debug!(address = %self.inner.address, "DISCOVER");
                self.inner
                    .worker
                    .call(|transport| transport.discover_attributes())
                    .await??;
            }

            match self
                .inner
                .rendezvous
                .wait(OperationKind::Discovery, Some(self.inner.config.discovery_timeout))
                .await
            {
                None => return Err(GattError::DiscoveryTimeout),
                Some(status) if !status.is_success() => {
                    return Err(GattError::Status {
                        kind: OperationKind::Discovery,
                        status,
                    })
                }
                Some(_) => {}
            }

            let services = self.inner.worker.call(|transport| transport.services()).await?;
            let mut directory = self.inner.directory();
            directory.replace(services);
            info!(
                address = %self.inner.address,
                services = directory.service_count(),
                characteristics = directory.characteristic_count(),
                "Discovery complete"
            );
            Ok(())
        }
    }

    /// Transport handle for a discovered service or characteristic
    pub fn lookup(&self, uuid: &Uuid) -> Option<AttributeHandle> {
        self.inner.directory().lookup(uuid)
    }

    /// Snapshot of the attribute directory
    pub fn directory(&self) -> AttributeDirectory {
        self.inner.directory().clone()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Read a characteristic and return its value
    #[track_caller]
    pub fn read(&self, uuid: Uuid) -> impl Future<Output = Result<Vec<u8>>> + '_ {
        let caller = Location::caller();
        async move {
            self.ensure_connected("read", caller)?;
            let handle = self.inner.handle_of(&uuid)?;

            let _gate = self.inner.gate.acquire().await;
            debug!(%uuid, %handle, "READ");
            self.inner
                .worker
                .call(move |transport| transport.read_attribute(handle))
                .await??;
            self.inner
                .complete(OperationKind::Read, self.inner.config.request_timeout)
                .await?;

            Ok(self.inner.directory().value(&uuid).unwrap_or_default())
        }
    }

    /// Write a characteristic and wait for the acknowledgement
    #[track_caller]
    pub fn write<'a>(&'a self, uuid: Uuid, value: &[u8]) -> impl Future<Output = Result<()>> + 'a {
        let caller = Location::caller();
        let value = value.to_vec();
        async move {
            self.ensure_connected("write", caller)?;
            let handle = self.inner.handle_of(&uuid)?;

            let _gate = self.inner.gate.acquire().await;
            debug!(%uuid, %handle, len = value.len(), "WRITE");
            self.inner.directory().set_value(&uuid, value.clone());
            self.inner
                .worker
                .call(move |transport| transport.write_attribute(handle, &value))
                .await??;
            self.inner
                .complete(OperationKind::Write, self.inner.config.request_timeout)
                .await
        }
    }

    /// Write a characteristic inside a reliable-write transaction
    #[track_caller]
    pub fn reliable_write<'a>(
        &'a self,
        uuid: Uuid,
        value: &[u8],
    ) -> impl Future<Output = Result<()>> + 'a {
        let caller = Location::caller();
        let value = value.to_vec();
        async move {
            self.ensure_connected("reliable write", caller)?;
            let handle = self.inner.handle_of(&uuid)?;
            let timeout = self.inner.config.request_timeout;

            let _gate = self.inner.gate.acquire().await;
            debug!(%uuid, %handle, "RWRITE");
            self.inner.directory().set_value(&uuid, value.clone());
            self.inner
                .worker
                .call(move |transport| {
                    transport.begin_reliable_write()?;
                    transport.write_attribute(handle, &value)
                })
                .await??;
            self.inner.complete(OperationKind::Write, timeout).await?;

            self.inner
                .worker
                .call(|transport| transport.execute_reliable_write())
                .await??;
            self.inner
                .complete(OperationKind::ReliableWrite, timeout)
                .await
        }
    }

    /// Read a descriptor of a characteristic and return its value
    #[track_caller]
    pub fn read_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> impl Future<Output = Result<Vec<u8>>> + '_ {
        let caller = Location::caller();
        async move {
            self.ensure_connected("descriptor read", caller)?;
            let handle = self.descriptor_handle(&characteristic, &descriptor)?;

            let _gate = self.inner.gate.acquire().await;
            debug!(%characteristic, %descriptor, "DREAD");
            self.inner
                .worker
                .call(move |transport| transport.read_descriptor(handle))
                .await??;
            self.inner
                .complete(
                    OperationKind::DescriptorRead,
                    self.inner.config.request_timeout,
                )
                .await?;

            Ok(self
                .inner
                .directory()
                .descriptor(&characteristic, &descriptor)
                .map(|d| d.value.clone())
                .unwrap_or_default())
        }
    }

    /// Write a descriptor of a characteristic and wait for the acknowledgement
    #[track_caller]
    pub fn write_descriptor<'a>(
        &'a self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> impl Future<Output = Result<()>> + 'a {
        let caller = Location::caller();
        let value = value.to_vec();
        async move {
            self.ensure_connected("descriptor write", caller)?;
            let handle = self.descriptor_handle(&characteristic, &descriptor)?;

            let _gate = self.inner.gate.acquire().await;
            debug!(%characteristic, %descriptor, "DWRITE");
            self.inner
                .directory()
                .set_descriptor_value(&characteristic, &descriptor, value.clone());
            self.inner
                .worker
                .call(move |transport| transport.write_descriptor(handle, &value))
                .await??;
            self.inner
                .complete(
                    OperationKind::DescriptorWrite,
                    self.inner.config.request_timeout,
                )
                .await
        }
    }

    /// Read the link's signal strength in dBm
    #[track_caller]
    pub fn read_rssi(&self) -> impl Future<Output = Result<i16>> + '_ {
        let caller = Location::caller();
        async move {
            self.ensure_connected("read rssi", caller)?;

            let _gate = self.inner.gate.acquire().await;
            debug!(address = %self.inner.address, "RSSI");
            self.inner
                .worker
                .call(|transport| transport.read_signal_strength())
                .await??;
            self.inner
                .complete(OperationKind::SignalStrength, self.inner.config.rssi_timeout)
                .await?;

            Ok(self.inner.rssi.load(Ordering::SeqCst) as i16)
        }
    }

    /// Last signal strength reported by the transport
    pub fn last_rssi(&self) -> i16 {
        self.inner.rssi.load(Ordering::SeqCst) as i16
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Turn pushed notifications for `uuid` on or off
    ///
    /// The callback is installed (or cleared) before anything else. Enabling takes
    /// effect immediately. Disabling is deferred by `disable_debounce` and dropped if
    /// another `set_notification` for the same attribute arrives in the meantime.
    #[track_caller]
    pub fn set_notification(
        &self,
        uuid: Uuid,
        enable: bool,
        callback: Option<NotifyCallback>,
    ) -> impl Future<Output = Result<()>> + '_ {
        let caller = Location::caller();
        async move {
            self.ensure_connected("set notification", caller)?;
            self.inner.handle_of(&uuid)?;

            let generation = self.inner.subscriptions.update(uuid, callback);

            if self.is_notification_enabled(&uuid) == enable {
                return Ok(());
            }

            if enable {
                self.inner.write_notification_config(uuid, true, None).await
            } else {
                self.schedule_disable(uuid, generation);
                Ok(())
            }
        }
    }

    fn schedule_disable(&self, uuid: Uuid, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.disable_debounce;
        debug!(%uuid, delay_ms = delay.as_millis() as u64, "Deferring notification disable");

        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_connected() {
                if inner.subscriptions.begin_disable(&uuid, generation) {
                    debug!(%uuid, "Link down, skipping deferred notification disable");
                    inner.subscriptions.retire(&uuid, generation);
                }
                return;
            }

            match inner
                .write_notification_config(uuid, false, Some(generation))
                .await
            {
                Ok(()) => debug!(%uuid, "Notifications disabled"),
                Err(e) => warn!(%uuid, "Deferred notification disable failed: {}", e),
            }
            inner.subscriptions.retire(&uuid, generation);
        });

        self.inner
            .subscriptions
            .arm_disable(uuid, generation, timer);
    }

    /// Whether the cached configuration descriptor of `uuid` has notifications on
    ///
    /// No transport round trip. False when disconnected or the attribute is unknown.
    pub fn is_notification_enabled(&self, uuid: &Uuid) -> bool {
        if !self.is_connected() {
            error!(%uuid, "Notification state queried on a disconnected peripheral");
            return false;
        }
        match self.inner.directory().notification_enabled(uuid) {
            Some(enabled) => enabled,
            None => {
                error!(%uuid, "Notification state queried for an unknown characteristic");
                false
            }
        }
    }

    pub fn notification_callback(&self, uuid: &Uuid) -> Option<NotifyCallback> {
        self.inner.subscriptions.callback(uuid)
    }

    /// Whether a deferred disable for `uuid` is still waiting out its grace period
    pub fn has_pending_disable(&self, uuid: &Uuid) -> bool {
        self.inner.subscriptions.has_pending_disable(uuid)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn ensure_connected(&self, operation: &'static str, caller: &'static Location<'static>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        error!(
            address = %self.inner.address,
            operation,
            %caller,
            "Operation attempted on a disconnected peripheral"
        );
        Err(GattError::NotConnected)
    }

    fn descriptor_handle(&self, characteristic: &Uuid, descriptor: &Uuid) -> Result<AttributeHandle> {
        let directory = self.inner.directory();
        if directory.characteristic(characteristic).is_none() {
            return Err(GattError::UnknownAttribute {
                uuid: *characteristic,
            });
        }
        directory
            .descriptor(characteristic, descriptor)
            .map(|d| d.handle)
            .ok_or(GattError::UnknownDescriptor {
                characteristic: *characteristic,
                descriptor: *descriptor,
            })
    }
}

impl Drop for Peripheral {
    fn drop(&mut self) {
        self.inner.subscriptions.clear();
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripheral")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}
