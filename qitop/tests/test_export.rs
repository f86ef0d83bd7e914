use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

use qitop::bus::MemoryBus;
use qitop::export::RecordExporter;
use qitop::monitor::{Monitor, MonitorConfig};
use qitop_common::{MethodStatistic, Timeval, TraceEvent};

#[tokio::test]
async fn test_export_session_to_file() {
    let bus = MemoryBus::new();
    bus.add_service("Camera", "m1:100", &[(100, "getImage")]);
    bus.add_service("Motion", "m1:200", &[(100, "moveTo")]);
    let config = MonitorConfig {
        poll_interval: Duration::from_millis(10),
        ..MonitorConfig::default()
    };
    let monitor = Monitor::start(Arc::new(bus.clone()), config).await.unwrap();
    monitor.select_method("Motion", "moveTo").await.unwrap();

    bus.set_statistic("Camera", 100, MethodStatistic::new(9, 0.001, 0.004, 0.018));
    bus.set_statistic("Motion", 100, MethodStatistic::new(2, 0.010, 0.030, 0.040));
    bus.emit_trace("Motion", &TraceEvent::call(1, 100, Timeval::new(5, 0), vec![0; 16]));
    bus.emit_trace("Motion", &TraceEvent::error(1, 100, Timeval::new(5, 30_000), vec![]));

    let records = monitor.records();
    let wait = move || records.recv_timeout(Duration::from_secs(2));
    let record = tokio::task::spawn_blocking(wait).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while monitor.ranking_snapshot().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let mut exporter = RecordExporter::new();
    exporter.add_record(record);
    exporter.set_ranking(monitor.ranking_snapshot());
    monitor.shutdown().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    exporter.export(BufWriter::new(File::create(&path).unwrap())).unwrap();

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed["ranking"][0]["action"], "Camera.getImage");
    assert_eq!(parsed["ranking"][0]["count"], 9);
    assert_eq!(parsed["ranking"][1]["action"], "Motion.moveTo");
    assert_eq!(parsed["ranking"][1]["rank"], 2);
    assert_eq!(parsed["calls"][0]["duration_us"], 30_000);
    assert_eq!(parsed["calls"][0]["outcome"], "error");
    assert_eq!(parsed["calls"][0]["slot"], 100);
}
