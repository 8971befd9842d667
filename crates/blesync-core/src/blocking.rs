//! Thread-blocking facade over [`Peripheral`]
//!
//! For callers on plain OS threads. Every method drives the async operation to
//! completion on the runtime the peripheral was created in and blocks the calling
//! thread meanwhile. Calling these from inside an async task panics, as
//! [`Handle::block_on`] does.

use std::sync::Arc;

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::connection::{ConnectionState, ObserverCallback, ObserverHandle};
use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::subscription::NotifyCallback;

#[derive(Debug, Clone)]
pub struct BlockingPeripheral {
    peripheral: Arc<Peripheral>,
    runtime: Handle,
}

impl BlockingPeripheral {
    pub fn new(peripheral: Arc<Peripheral>, runtime: Handle) -> Self {
        Self {
            peripheral,
            runtime,
        }
    }

    pub fn peripheral(&self) -> &Arc<Peripheral> {
        &self.peripheral
    }

    pub fn connect(&self) -> Result<()> {
        self.runtime.block_on(self.peripheral.connect())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.runtime.block_on(self.peripheral.disconnect())
    }

    #[track_caller]
    pub fn discover(&self) -> Result<()> {
        self.runtime.block_on(self.peripheral.discover())
    }

    #[track_caller]
    pub fn read(&self, uuid: Uuid) -> Result<Vec<u8>> {
        self.runtime.block_on(self.peripheral.read(uuid))
    }

    #[track_caller]
    pub fn write(&self, uuid: Uuid, value: &[u8]) -> Result<()> {
        self.runtime.block_on(self.peripheral.write(uuid, value))
    }

    #[track_caller]
    pub fn set_notification(
        &self,
        uuid: Uuid,
        enable: bool,
        callback: Option<NotifyCallback>,
    ) -> Result<()> {
        self.runtime
            .block_on(self.peripheral.set_notification(uuid, enable, callback))
    }

    #[track_caller]
    pub fn read_rssi(&self) -> Result<i16> {
        self.runtime.block_on(self.peripheral.read_rssi())
    }

    pub fn is_notification_enabled(&self, uuid: &Uuid) -> bool {
        self.peripheral.is_notification_enabled(uuid)
    }

    pub fn state(&self) -> ConnectionState {
        self.peripheral.state()
    }

    pub fn add_connection_observer(
        &self,
        state: ConnectionState,
        callback: ObserverCallback,
    ) -> ObserverHandle {
        self.peripheral.add_connection_observer(state, callback)
    }

    pub fn cancel_connection_observer(&self, handle: ObserverHandle) -> bool {
        self.peripheral.cancel_connection_observer(handle)
    }
}
