//! TcpAdapter against a fake device on a local listener.

use roughd::adapters::{TcpAdapter, Transport};
use roughd::error::RoughError;
use roughd::instrument::PumpDriver;
use roughd::observation::ObservationSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accepts `connections` connections, answering each request with `reply`,
/// and returns every request it received.
async fn fake_device(reply: &'static str, connections: usize) -> (u16, JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..connections {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0u8; 256];
            let n = stream.read(&mut buffer).await.unwrap();
            buffer.truncate(n);
            requests.push(buffer);
            stream.write_all(reply.as_bytes()).await.unwrap();
            // The adapter closes its side after reading the reply.
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
        }
        requests
    });
    (port, task)
}

fn adapter(port: u16, timeout: Duration) -> TcpAdapter {
    TcpAdapter::new("pump", "127.0.0.1", port, timeout)
}

#[tokio::test]
async fn test_exchange_appends_terminator() {
    let (port, device) = fake_device("=S801 nXDS;D396;P184;1800\r", 1).await;

    let reply = adapter(port, Duration::from_secs(1))
        .send(b"?S801")
        .await
        .unwrap();
    assert_eq!(reply, b"=S801 nXDS;D396;P184;1800\r");

    let requests = device.await.unwrap();
    assert_eq!(requests, vec![b"?S801\r".to_vec()]);
}

#[tokio::test]
async fn test_each_command_uses_a_fresh_connection() {
    let (port, device) = fake_device("*C802 0\r", 2).await;
    let link = adapter(port, Duration::from_secs(1));

    link.send(b"!C802 1").await.unwrap();
    link.send(b"!C802 0").await.unwrap();

    let requests = device.await.unwrap();
    assert_eq!(requests, vec![b"!C802 1\r".to_vec(), b"!C802 0\r".to_vec()]);
}

#[tokio::test]
async fn test_driver_over_tcp() {
    let (port, device) = fake_device("=V802 150;00F0;0000;0000;0000\r", 1).await;
    let pump = PumpDriver::new(
        "pump",
        Arc::new(adapter(port, Duration::from_secs(1))),
        ObservationSink::new(8),
    );

    let status = pump.quick_status().await.unwrap();
    assert_eq!(status.speed_hz, 150);
    assert!(status.error_summary.is_ok());
    device.await.unwrap();
}

#[tokio::test]
async fn test_refused_connection_is_connect_error() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = adapter(port, Duration::from_millis(500))
        .send(b"?S801")
        .await
        .unwrap_err();
    assert!(matches!(err, RoughError::Connect { .. }), "got {err:?}");
    assert!(err.is_communication());
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = Vec::new();
        // Read until the adapter gives up and closes.
        let _ = stream.read_to_end(&mut sink).await;
        sink
    });

    let timeout = Duration::from_millis(200);
    let err = adapter(port, timeout).send(b"?V802").await.unwrap_err();
    assert!(
        matches!(err, RoughError::ReadTimeout { timeout: t, .. } if t == timeout),
        "got {err:?}"
    );

    assert_eq!(device.await.unwrap(), b"?V802\r");
}

#[tokio::test]
async fn test_closed_without_reply_is_receive_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buffer = [0u8; 64];
        let _ = stream.read(&mut buffer).await;
    });

    let err = adapter(port, Duration::from_secs(1))
        .send(b"?V802")
        .await
        .unwrap_err();
    assert!(matches!(err, RoughError::Receive { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_stalled_write_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = tokio::spawn(async move {
        // Accept but never read, so the sender's buffers fill up.
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(stream);
    });

    let command = vec![b'x'; 32 * 1024 * 1024];
    let started = std::time::Instant::now();
    let err = adapter(port, Duration::from_millis(200))
        .send(&command)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, RoughError::Send { source, .. } if source.kind() == std::io::ErrorKind::TimedOut),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
    device.abort();
}
