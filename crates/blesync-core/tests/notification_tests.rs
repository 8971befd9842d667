//! Notification delivery and the debounced disable

use std::time::Duration;

use blesync_core::testing::{sample, sample_handle, TransportCall};
use blesync_core::{
    GattError, SerialGate, TransportEvent, CLIENT_CHARACTERISTIC_CONFIG_UUID,
    DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};

mod test_utils;
use test_utils::{
    create_connected_peripheral, create_connected_peripheral_on, create_peripheral, settle,
    NotificationRecorder,
};

#[tokio::test]
async fn test_enable_writes_configuration_descriptor() {
    let (peripheral, script) = create_connected_peripheral().await;
    let handle = sample_handle(sample::STREAM).unwrap();

    assert!(!peripheral.is_notification_enabled(&sample::STREAM));
    peripheral
        .set_notification(sample::STREAM, true, Some(NotificationRecorder::new().callback()))
        .await
        .unwrap();

    assert!(peripheral.is_notification_enabled(&sample::STREAM));
    assert_eq!(script.descriptor_writes(&ENABLE_NOTIFICATION_VALUE), 1);
    assert!(script
        .calls()
        .contains(&TransportCall::SetNotification(handle, true)));
}

#[tokio::test]
async fn test_enable_twice_writes_once() {
    let (peripheral, script) = create_connected_peripheral().await;

    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();

    assert_eq!(script.descriptor_writes(&ENABLE_NOTIFICATION_VALUE), 1);
}

#[tokio::test]
async fn test_notification_delivered_exactly_once() {
    let (peripheral, script) = create_connected_peripheral().await;
    let recorder = NotificationRecorder::new();
    peripheral
        .set_notification(sample::STREAM, true, Some(recorder.callback()))
        .await
        .unwrap();

    script.emit(TransportEvent::AttributeChanged {
        uuid: sample::STREAM,
        value: Some(vec![1, 2]),
    });
    settle().await;

    let received = recorder.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].uuid, sample::STREAM);
    assert_eq!(received[0].payload, vec![1, 2]);
    assert!(received[0].timestamp.as_millis() > 0);
    assert_eq!(peripheral.directory().value(&sample::STREAM), Some(vec![1, 2]));
}

#[tokio::test]
async fn test_change_without_payload_is_ignored() {
    let (peripheral, script) = create_connected_peripheral().await;
    let recorder = NotificationRecorder::new();
    peripheral
        .set_notification(sample::STREAM, true, Some(recorder.callback()))
        .await
        .unwrap();

    script.emit(TransportEvent::AttributeChanged {
        uuid: sample::STREAM,
        value: None,
    });
    settle().await;

    assert!(recorder.received().is_empty());
}

#[tokio::test]
async fn test_change_without_subscriber_updates_cache() {
    let (peripheral, script) = create_connected_peripheral().await;

    script.emit(TransportEvent::AttributeChanged {
        uuid: sample::COMMAND,
        value: Some(vec![0x33]),
    });

    assert_eq!(peripheral.directory().value(&sample::COMMAND), Some(vec![0x33]));
}

#[tokio::test]
async fn test_set_notification_preconditions() {
    let (peripheral, _script) = create_peripheral();
    assert_eq!(
        peripheral.set_notification(sample::STREAM, true, None).await,
        Err(GattError::NotConnected)
    );
    assert!(!peripheral.is_notification_enabled(&sample::STREAM));

    let (peripheral, _script) = create_connected_peripheral().await;
    assert_eq!(
        peripheral.set_notification(sample::MISSING, true, None).await,
        Err(GattError::UnknownAttribute {
            uuid: sample::MISSING
        })
    );
    assert_eq!(
        peripheral.set_notification(sample::COMMAND, true, None).await,
        Err(GattError::UnknownDescriptor {
            characteristic: sample::COMMAND,
            descriptor: CLIENT_CHARACTERISTIC_CONFIG_UUID,
        })
    );
}

// ----------------------------------------------------------------------------
// Debounced Disable
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_disable_is_deferred() {
    let (peripheral, script) = create_connected_peripheral().await;
    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2900)).await;

    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 0);
    assert!(peripheral.is_notification_enabled(&sample::STREAM));
    assert!(peripheral.has_pending_disable(&sample::STREAM));
}

#[tokio::test(start_paused = true)]
async fn test_disable_lands_after_grace_period() {
    let (peripheral, script) = create_connected_peripheral().await;
    let recorder = NotificationRecorder::new();
    peripheral
        .set_notification(sample::STREAM, true, Some(recorder.callback()))
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();
    assert!(peripheral.notification_callback(&sample::STREAM).is_none());

    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 1);
    assert!(!peripheral.is_notification_enabled(&sample::STREAM));
    assert!(!peripheral.has_pending_disable(&sample::STREAM));
}

#[tokio::test(start_paused = true)]
async fn test_reenable_cancels_pending_disable() {
    let (peripheral, script) = create_connected_peripheral().await;

    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 0);
    assert_eq!(script.descriptor_writes(&ENABLE_NOTIFICATION_VALUE), 1);
    assert!(peripheral.is_notification_enabled(&sample::STREAM));
    assert!(!peripheral.has_pending_disable(&sample::STREAM));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_disable_restarts_grace_period() {
    let (peripheral, script) = create_connected_peripheral().await;

    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2000)).await;
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_disable_skipped_after_link_loss() {
    let (peripheral, script) = create_connected_peripheral().await;

    peripheral
        .set_notification(sample::STREAM, true, None)
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();
    peripheral.disconnect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 0);
    assert!(!peripheral.has_pending_disable(&sample::STREAM));
}

#[tokio::test(start_paused = true)]
async fn test_reenable_while_disable_waits_for_gate() {
    let gate = SerialGate::new();
    let (peripheral, script) = create_connected_peripheral_on(gate.clone()).await;
    let recorder = NotificationRecorder::new();

    peripheral
        .set_notification(sample::STREAM, true, Some(recorder.callback()))
        .await
        .unwrap();
    peripheral
        .set_notification(sample::STREAM, false, None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2990)).await;

    // The deferred disable fires while another operation holds the radio
    let busy = gate.acquire().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    peripheral
        .set_notification(sample::STREAM, true, Some(recorder.callback()))
        .await
        .unwrap();
    drop(busy);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(script.descriptor_writes(&DISABLE_NOTIFICATION_VALUE), 0);
    assert!(peripheral.is_notification_enabled(&sample::STREAM));
    assert!(peripheral.notification_callback(&sample::STREAM).is_some());
    assert!(!peripheral.has_pending_disable(&sample::STREAM));

    script.emit(TransportEvent::AttributeChanged {
        uuid: sample::STREAM,
        value: Some(vec![5]),
    });
    settle().await;
    assert_eq!(recorder.received().len(), 1);
}
