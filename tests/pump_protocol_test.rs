//! Pump command and reply handling against a scripted controller.

use roughd::adapters::MockAdapter;
use roughd::instrument::status_word::FlagSummary;
use roughd::instrument::PumpDriver;
use roughd::observation::{Event, Observation, ObservationSink, Severity};
use std::sync::Arc;
use tokio::sync::broadcast;

fn pump_with(adapter: &MockAdapter) -> (PumpDriver, broadcast::Receiver<Observation>) {
    let sink = ObservationSink::new(64);
    let rx = sink.subscribe();
    (PumpDriver::new("pump", Arc::new(adapter.clone()), sink), rx)
}

fn drain(rx: &mut broadcast::Receiver<Observation>) -> Vec<Observation> {
    let mut seen = Vec::new();
    while let Ok(observation) = rx.try_recv() {
        seen.push(observation);
    }
    seen
}

#[tokio::test]
async fn test_quick_status_healthy_pump() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?V802", "=V802 150;00F0;0000;0000;0000");
    let (pump, mut rx) = pump_with(&adapter);

    let status = pump.quick_status().await.unwrap();
    assert_eq!(status.speed_hz, 150);
    assert_eq!(status.error_mask, 0);
    assert_eq!(status.error_summary, FlagSummary::Ok);
    assert!(drain(&mut rx).is_empty(), "quick status reports nothing");
}

#[tokio::test]
async fn test_quick_status_over_voltage() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?V802", "=V802 150;00F0;0000;0000;0002");
    let (pump, _rx) = pump_with(&adapter);

    let status = pump.quick_status().await.unwrap();
    assert_eq!(status.error_mask, 0x0002);
    assert_eq!(status.error_summary.flags(), &["Over voltage trip"]);
}

#[tokio::test]
async fn test_start_and_stop_send_run_register() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("!C802 1", "*C802 0");
    adapter.respond("!C802 0", "*C802 0");
    let (pump, mut rx) = pump_with(&adapter);

    assert_eq!(pump.start().await.unwrap(), vec!["0"]);
    assert_eq!(pump.stop().await.unwrap(), vec!["0"]);
    assert_eq!(adapter.call_log(), vec!["!C802 1", "!C802 0"]);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_mismatched_header_warns_and_decodes() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?S801", "=S802 nXDS;D396;P184;1800");
    let (pump, mut rx) = pump_with(&adapter);

    let fields = pump.ident().await.unwrap();
    assert_eq!(fields, vec!["nXDS", "D396", "P184", "1800"]);

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].severity, Severity::Warning);
    assert_eq!(
        seen[0].event,
        Event::MalformedReply {
            command: "?S801".to_string(),
            received: "=S802".to_string(),
            expected: "=S801".to_string(),
        }
    );
}

#[tokio::test]
async fn test_standby_sets_speed_then_enables() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("!S805 90", "*S805 0");
    adapter.respond("!C803 1", "*C803 0");
    adapter.respond("!C803 0", "*C803 0");
    let (pump, _rx) = pump_with(&adapter);

    let reply = pump.start_standby(90).await.unwrap();
    assert_eq!(reply.trim(), "*C803 0");
    pump.stop_standby().await.unwrap();
    assert_eq!(adapter.call_log(), vec!["!S805 90", "!C803 1", "!C803 0"]);
}

#[tokio::test]
async fn test_rejected_standby_speed_warns() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("!S805 250", "#S805 ERR");
    adapter.respond("!C803 1", "*C803 0");
    let (pump, mut rx) = pump_with(&adapter);

    let reply = pump.start_standby(250).await.unwrap();
    assert_eq!(reply, "*C803 0\r");

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].severity, Severity::Warning);
    assert_eq!(
        seen[0].event,
        Event::MalformedReply {
            command: "!S805 250".to_string(),
            received: "#S805".to_string(),
            expected: "*S805".to_string(),
        }
    );
}

#[tokio::test]
async fn test_standby_off_mismatch_warns() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("!C803 0", "*C802 0");
    let (pump, mut rx) = pump_with(&adapter);

    assert_eq!(pump.stop_standby().await.unwrap(), "*C802 0\r");
    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0].event, Event::MalformedReply { ref expected, .. } if expected == "*C803"));
}

#[tokio::test]
async fn test_lifetimes_query_order_and_slots() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?V811", "=V811 100;0");
    adapter.respond("?V810", "=V810 200;0");
    adapter.respond("?V813", "=V813 300;4000");
    adapter.respond("?V814", "=V814 0;5000");
    adapter.respond("?V815", "=V815 0;6000");
    let (pump, mut rx) = pump_with(&adapter);

    let lifetimes = pump.pump_lifetimes().await.unwrap();
    assert_eq!(lifetimes.elapsed, [100, 200, 300]);
    assert_eq!(lifetimes.remaining, [4000, 5000, 6000]);
    assert_eq!(
        adapter.call_log(),
        vec!["?V811", "?V810", "?V813", "?V814", "?V815"]
    );

    let events: Vec<Event> = drain(&mut rx).into_iter().map(|o| o.event).collect();
    assert_eq!(
        events,
        vec![
            Event::PumpTimes {
                hours: [100, 200, 300]
            },
            Event::PumpLife {
                hours: [4000, 5000, 6000]
            },
        ]
    );
}

#[tokio::test]
async fn test_speed_reports_status_breakdown() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?V802", "=V802 1500;0001;0000;0002;0000");
    let (pump, mut rx) = pump_with(&adapter);

    let report = pump.speed().await.unwrap();
    assert_eq!(report.speed_hz, 1500);
    assert_eq!(report.status.status_word, 0x0001);
    assert_eq!(report.status.warning_mask, 0x0002);

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0].event, Event::PumpSpeed { hz: 1500 });
    assert!(matches!(seen[1].event, Event::PumpStatus { word: 1, .. }));
    assert_eq!(seen[2].severity, Severity::Warning);
    assert!(matches!(seen[2].event, Event::PumpWarnings { mask: 2, .. }));
    assert_eq!(seen[3].severity, Severity::Info);
    assert_eq!(
        seen[3].event,
        Event::PumpErrors {
            mask: 0,
            summary: FlagSummary::Ok
        }
    );
}

#[tokio::test]
async fn test_status_reads_everything() {
    let adapter = MockAdapter::new("pump");
    adapter.respond("?V802", "=V802 1500;0000;0000;0000;0000");
    adapter.respond("?V808", "=V808 31;28");
    for code in ["V811", "V810", "V813", "V814", "V815"] {
        adapter.respond(&format!("?{code}"), &format!("={code} 1;2"));
    }
    let (pump, _rx) = pump_with(&adapter);

    let report = pump.status().await.unwrap();
    assert_eq!(report.temps, [31, 28]);
    assert_eq!(report.lifetimes.elapsed, [1, 1, 1]);
    assert_eq!(report.lifetimes.remaining, [2, 2, 2]);
    assert_eq!(adapter.call_count(), 7);
}

#[tokio::test]
async fn test_unreachable_pump_is_communication_error() {
    let adapter = MockAdapter::new("pump");
    adapter.set_unreachable(true);
    let (pump, _rx) = pump_with(&adapter);

    let err = pump.quick_status().await.unwrap_err();
    assert!(err.is_communication());
}
