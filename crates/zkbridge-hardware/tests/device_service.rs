//! Integration tests for DeviceService
//!
//! These verify that concurrent callers are serialized onto the device
//! and that status reads do not wait behind a running capture.

use std::time::{Duration, Instant};
use zkbridge_core::{ClientIdentity, ConnectionType, DeviceConfig};
use zkbridge_hardware::manager::ConnectionManager;
use zkbridge_hardware::mock::{CaptureEvent, MockBus, MockReply};
use zkbridge_hardware::service::DeviceService;
use zkbridge_hardware::transport::AnyTransport;

fn service(bus: &MockBus) -> DeviceService {
    let config = DeviceConfig::default();
    let transports = bus
        .transports(&ConnectionType::PRIORITY)
        .into_iter()
        .map(AnyTransport::Mock)
        .collect();
    let manager =
        ConnectionManager::with_transports(&config, ClientIdentity::local("integration"), transports);
    DeviceService::new(manager, &config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_captures_serialize() {
    let bus = MockBus::new();
    bus.plug(ConnectionType::Serial, 1);
    bus.set_capture_delay(ConnectionType::Serial, Duration::from_millis(150));
    bus.queue_reply(ConnectionType::Serial, MockReply::Frame(vec![0, 90, 0, 0, 1]));
    bus.queue_reply(ConnectionType::Serial, MockReply::Frame(vec![0, 91, 0, 0, 2]));

    let service = service(&bus);
    assert!(service.connect().await.unwrap().is_connected());

    let a = tokio::spawn({
        let service = service.clone();
        async move { service.capture(Some(Duration::from_secs(1))).await }
    });
    let b = tokio::spawn({
        let service = service.clone();
        async move { service.capture(Some(Duration::from_secs(1))).await }
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_success());
    assert!(b.is_success());

    assert_eq!(bus.max_captures_in_flight(), 1);
    assert_eq!(
        bus.events(),
        vec![
            CaptureEvent::Started(ConnectionType::Serial),
            CaptureEvent::Finished(ConnectionType::Serial),
            CaptureEvent::Started(ConnectionType::Serial),
            CaptureEvent::Finished(ConnectionType::Serial),
        ]
    );
    assert_eq!(service.status().total_scans, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_does_not_wait_for_capture() {
    let bus = MockBus::new();
    bus.plug(ConnectionType::Hid, 1);
    bus.set_capture_delay(ConnectionType::Hid, Duration::from_millis(400));
    bus.queue_reply(ConnectionType::Hid, MockReply::Frame(vec![0, 50, 0, 0]));

    let service = service(&bus);
    service.connect().await.unwrap();

    let capture = tokio::spawn({
        let service = service.clone();
        async move { service.capture(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let status = service.status();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(status.connected);
    assert_eq!(status.total_scans, 0);

    assert!(capture.await.unwrap().is_success());
    assert_eq!(service.status().total_scans, 1);
}

#[tokio::test]
async fn test_connect_visible_to_every_clone() {
    let bus = MockBus::new();
    bus.plug(ConnectionType::Sdk, 1);
    let ws_view = service(&bus);
    let http_view = ws_view.clone();
    let mut rx = http_view.subscribe();

    ws_view.connect().await.unwrap();

    rx.changed().await.unwrap();
    assert!(rx.borrow().connected);
    assert_eq!(http_view.status().connection_type, Some(ConnectionType::Sdk));
}
