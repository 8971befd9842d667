//! Test utilities for driving peripherals over a scripted transport

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use blesync_core::testing::{sample_services, ScriptHandle, ScriptedTransport};
use blesync_core::{
    Notification, NotifyCallback, Peripheral, PeripheralAddress, PeripheralConfig, SerialGate,
};

pub const ADDRESS: &str = "C4:BE:84:12:34:56";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn create_test_address() -> PeripheralAddress {
    PeripheralAddress::from(ADDRESS)
}

/// Disconnected peripheral over a scripted transport reporting the sample services
pub fn create_peripheral() -> (Peripheral, ScriptHandle) {
    create_peripheral_with(PeripheralConfig::default())
}

pub fn create_peripheral_with(config: PeripheralConfig) -> (Peripheral, ScriptHandle) {
    init_tracing();
    let (transport, script) = ScriptedTransport::new(sample_services());
    let peripheral = Peripheral::new(create_test_address(), transport, config, SerialGate::new());
    (peripheral, script)
}

/// Connected, discovered peripheral serialized on `gate`
pub async fn create_connected_peripheral_on(gate: SerialGate) -> (Peripheral, ScriptHandle) {
    init_tracing();
    let (transport, script) = ScriptedTransport::new(sample_services());
    let peripheral =
        Peripheral::new(create_test_address(), transport, PeripheralConfig::default(), gate);
    peripheral.connect().await.expect("scripted connect succeeds");
    peripheral.discover().await.expect("scripted discovery succeeds");
    (peripheral, script)
}

/// Connected peripheral with a populated attribute directory
pub async fn create_connected_peripheral() -> (Peripheral, ScriptHandle) {
    let (peripheral, script) = create_peripheral();
    peripheral.connect().await.expect("scripted connect succeeds");
    peripheral.discover().await.expect("scripted discovery succeeds");
    (peripheral, script)
}

/// Let spawned event and callback tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ----------------------------------------------------------------------------
// Notification Recorder
// ----------------------------------------------------------------------------

/// Collects every notification handed to its callback
#[derive(Clone, Default)]
pub struct NotificationRecorder {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> NotifyCallback {
        let received = self.received.clone();
        Arc::new(move |notification| {
            received.lock().unwrap().push(notification);
        })
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

/// Counts invocations of the callbacks it hands out
#[derive(Clone, Default)]
pub struct CallCounter {
    count: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> Arc<dyn Fn() + Send + Sync> {
        let count = self.count.clone();
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
