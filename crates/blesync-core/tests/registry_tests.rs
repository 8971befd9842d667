//! Peripheral registry and the thread-blocking facade

use std::sync::Arc;

use blesync_core::testing::{sample, sample_services, ScriptedTransport, TransportCall};
use blesync_core::{
    BlockingPeripheral, ConnectionState, GattError, OperationKind, Peripheral, PeripheralAddress,
    PeripheralConfig, PeripheralRegistry, SerialGate,
};
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

mod test_utils;
use test_utils::{create_test_address, init_tracing, NotificationRecorder};

#[tokio::test]
async fn test_registry_returns_existing_peripheral() {
    init_tracing();
    let registry = PeripheralRegistry::default();
    let (first, _) = ScriptedTransport::new(sample_services());
    let (second, second_script) = ScriptedTransport::new(sample_services());

    let a = registry.get_or_insert(create_test_address(), first);
    let b = registry.get_or_insert(create_test_address(), second);

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);

    a.connect().await.unwrap();
    assert!(second_script.calls().is_empty());
}

#[tokio::test]
async fn test_registry_lookup_and_removal() {
    let registry = PeripheralRegistry::new(PeripheralConfig::default());
    let address = PeripheralAddress::from("00:11:22:33:44:55");

    assert_eq!(
        assert_err!(registry.require(&address)),
        GattError::UnknownPeripheral {
            address: address.to_string()
        }
    );

    let (transport, _) = ScriptedTransport::new(sample_services());
    registry.get_or_insert(address.clone(), transport);
    assert_ok!(registry.require(&address));
    assert_eq!(registry.addresses(), vec![address.clone()]);

    assert!(registry.remove(&address).is_some());
    assert!(registry.get(&address).is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_serializes_across_peripherals() {
    let registry = PeripheralRegistry::default();
    let addresses: Vec<PeripheralAddress> = (1..=3)
        .map(|i| PeripheralAddress::new(format!("00:00:00:00:00:0{i}")))
        .collect();

    let peripherals: Vec<Arc<Peripheral>> = addresses
        .iter()
        .map(|address| {
            let (transport, _) = ScriptedTransport::new(sample_services());
            registry.get_or_insert(address.clone(), transport)
        })
        .collect();

    for peripheral in &peripherals {
        peripheral.connect().await.unwrap();
        peripheral.discover().await.unwrap();
    }
    assert_eq!(registry.connected().len(), 3);

    let writes = peripherals
        .iter()
        .map(|p| p.write(sample::COMMAND, &[1, 2, 3]));
    assert!(join_all(writes).await.iter().all(|r| r.is_ok()));
    assert!(!registry.gate().is_held());

    for peripheral in &peripherals {
        assert!(peripheral.rendezvous().peak_waiters(OperationKind::Write) <= 1);
    }
}

#[tokio::test]
async fn test_registry_shutdown_disconnects_all() {
    let registry = PeripheralRegistry::default();
    let (transport, script) = ScriptedTransport::new(sample_services());
    let peripheral = registry.get_or_insert(create_test_address(), transport);
    peripheral.connect().await.unwrap();

    registry.shutdown().await;

    assert!(registry.is_empty());
    assert!(peripheral.is_disconnected());
    assert_eq!(script.count(|c| *c == TransportCall::Disconnect), 1);
}

// ----------------------------------------------------------------------------
// Blocking Facade
// ----------------------------------------------------------------------------

#[test]
fn test_blocking_facade_from_plain_thread() {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let (transport, _script) = ScriptedTransport::new(sample_services());
    let peripheral = {
        let _guard = runtime.enter();
        Arc::new(Peripheral::new(
            create_test_address(),
            transport,
            PeripheralConfig::default(),
            SerialGate::new(),
        ))
    };
    let blocking = BlockingPeripheral::new(peripheral, runtime.handle().clone());

    let worker = std::thread::spawn(move || {
        blocking.connect().unwrap();
        blocking.discover().unwrap();
        blocking.write(sample::COMMAND, &[4, 2]).unwrap();
        let value = blocking.read(sample::COMMAND).unwrap();

        let recorder = NotificationRecorder::new();
        blocking
            .set_notification(sample::STREAM, true, Some(recorder.callback()))
            .unwrap();
        let enabled = blocking.is_notification_enabled(&sample::STREAM);

        blocking.disconnect().unwrap();
        (value, enabled, blocking.state())
    });

    let (value, enabled, state) = worker.join().unwrap();
    assert_eq!(value, vec![4, 2]);
    assert!(enabled);
    assert_eq!(state, ConnectionState::Disconnected);
}
