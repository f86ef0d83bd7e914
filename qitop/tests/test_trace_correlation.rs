use std::sync::Arc;
use std::time::Duration;

use qitop::bus::MemoryBus;
use qitop::correlation::{CallRecord, Outcome};
use qitop::monitor::{Monitor, MonitorConfig};
use qitop_common::{Timeval, TraceEvent, HEADER_SIZE};

fn config() -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(50),
        call_timeout: Duration::from_millis(200),
        retention_capacity: 8,
        record_channel_capacity: 64,
    }
}

async fn traced_monitor() -> (MemoryBus, Monitor) {
    let bus = MemoryBus::new();
    bus.add_service("Camera", "m1:100", &[(100, "getImage"), (101, "getResolution")]);
    let monitor = Monitor::start(Arc::new(bus.clone()), config()).await.unwrap();
    monitor.select_method("Camera", "getImage").await.unwrap();
    (bus, monitor)
}

async fn next_record(monitor: &Monitor) -> CallRecord {
    let records = monitor.records();
    tokio::task::spawn_blocking(move || records.recv_timeout(Duration::from_secs(2)))
        .await
        .unwrap()
        .expect("no call record received")
}

fn call(id: u32) -> TraceEvent {
    TraceEvent::call(id, 100, Timeval::new(100, 0), vec![0; 64])
}

fn reply(id: u32) -> TraceEvent {
    TraceEvent::reply(id, 100, Timeval::new(100, 2000), vec![0; 128]).with_cpu(50, 10)
}

#[tokio::test]
async fn test_pairing_is_independent_of_arrival_order() {
    let (bus, monitor) = traced_monitor().await;

    bus.emit_trace("Camera", &call(7));
    bus.emit_trace("Camera", &reply(7));
    let forward = next_record(&monitor).await;

    bus.emit_trace("Camera", &reply(8));
    bus.emit_trace("Camera", &call(8));
    let backward = next_record(&monitor).await;

    for record in [&forward, &backward] {
        assert_eq!(record.duration_us, 2000);
        assert_eq!(record.call_size, 64 + HEADER_SIZE);
        assert_eq!(record.reply_size, 128 + HEADER_SIZE);
        assert_eq!((record.user_us, record.system_us), (50, 10));
        assert_eq!(record.outcome, Outcome::Success);
    }
    assert_eq!(CallRecord { id: 8, ..forward }, backward);

    assert_eq!(monitor.latency_series(10), vec![2000.0, 2000.0]);
    assert_eq!(monitor.user_cpu_series(10), vec![50.0, 50.0]);
    assert_eq!(monitor.system_cpu_series(10), vec![10.0, 10.0]);
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_and_success_series_are_disjoint() {
    let (bus, monitor) = traced_monitor().await;

    bus.emit_trace("Camera", &call(1));
    bus.emit_trace("Camera", &TraceEvent::error(1, 100, Timeval::new(100, 700), vec![]));
    assert_eq!(next_record(&monitor).await.outcome, Outcome::Error);

    bus.emit_trace("Camera", &call(2));
    bus.emit_trace("Camera", &reply(2));
    assert_eq!(next_record(&monitor).await.outcome, Outcome::Success);

    assert_eq!(monitor.error_latency_series(10), vec![700.0]);
    assert_eq!(monitor.latency_series(10), vec![2000.0]);
    assert_eq!(monitor.call_size_series(10).len(), 2);
    assert_eq!(monitor.reply_size_series(10), vec![HEADER_SIZE as f64, (128 + HEADER_SIZE) as f64]);
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_other_and_ignored_slots_leave_no_trace() {
    let (bus, monitor) = traced_monitor().await;

    bus.emit_trace("Camera", &TraceEvent::call(1, 101, Timeval::new(1, 0), vec![]));
    bus.emit_trace("Camera", &TraceEvent::reply(1, 101, Timeval::new(1, 9), vec![]));
    bus.emit_trace("Camera", &TraceEvent::call(2, 0x51, Timeval::new(1, 0), vec![]));
    bus.emit_trace("Camera", &call(3));
    bus.emit_trace("Camera", &reply(3));
    assert_eq!(next_record(&monitor).await.id, 3);

    let stats = monitor.correlator_stats().unwrap();
    assert_eq!(stats.events, 5);
    assert_eq!(stats.discarded_other_slot, 2);
    assert_eq!(stats.discarded_ignored, 1);
    assert_eq!(stats.paired, 1);
    assert_eq!(stats.pending, 0);
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_series_stay_bounded() {
    let (bus, monitor) = traced_monitor().await;

    for id in 0..40 {
        bus.emit_trace("Camera", &call(id));
        bus.emit_trace(
            "Camera",
            &TraceEvent::reply(id, 100, Timeval::new(100, i64::from(id) + 1), vec![]),
        );
    }
    let records = monitor.records();
    let last = tokio::task::spawn_blocking(move || {
        let mut last = None;
        while let Ok(record) = records.recv_timeout(Duration::from_millis(500)) {
            last = Some(record.id);
            if record.id == 39 {
                break;
            }
        }
        last
    })
    .await
    .unwrap();
    assert_eq!(last, Some(39));

    let latencies = monitor.latency_series(8);
    assert_eq!(latencies, vec![33.0, 34.0, 35.0, 36.0, 37.0, 38.0, 39.0, 40.0]);
    assert!(monitor.latency_series(100).len() <= 16);
    monitor.shutdown().await.unwrap();
}
