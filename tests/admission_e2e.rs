//! End-to-end load shedding: real backend, real websocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use ws_fleet::client::Fleet;
use ws_fleet::net::{ConnectionError, Dialer, WsDialer};

mod common;
use common::{fast_client_config, start_backend, url, wait_until};

fn dialer() -> Arc<WsDialer> {
    Arc::new(WsDialer::new(Duration::from_secs(2), Duration::from_millis(500)))
}

#[tokio::test]
async fn admits_below_threshold_and_refuses_above() {
    let addr: SocketAddr = "127.0.0.1:28301".parse().unwrap();
    let backend = start_backend(addr, 50, 10).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let target = url(&format!("ws://{}/ws", addr));
    let cancel = CancellationToken::new();
    let mut config = fast_client_config();
    config.connections = 3;
    let fleet = Fleet::spawn(&target, &config, dialer(), cancel.clone());

    let counters = backend.admission.counters().clone();
    assert!(
        wait_until(Duration::from_secs(5), || fleet.connected_count() == 3 && counters.active() == 3).await,
        "expected 3 admitted sessions, got {}",
        counters.active()
    );
    assert_eq!(counters.dropped_total(), 0);

    backend.source.set_utilization(80);
    let err = dialer().dial(&target).await.unwrap_err();
    assert!(
        matches!(err, ConnectionError::Rejected { status: 503, .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(counters.dropped_total(), 1);
    assert_eq!(counters.dropped_interval(), 1);
    assert_eq!(counters.active(), 3);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), fleet.wait())
        .await
        .expect("fleet should drain");
    assert!(wait_until(Duration::from_secs(2), || counters.active() == 0).await);

    backend.shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), backend.handle).await;
}

#[tokio::test]
async fn probes_report_health_and_load_shedding() {
    let addr: SocketAddr = "127.0.0.1:28311".parse().unwrap();
    let backend = start_backend(addr, 50, 20).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let health = client.get(format!("http://{}/health", addr)).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let shedding = client.get(format!("http://{}/load-shedding", addr)).send().await.unwrap();
    assert_eq!(shedding.status(), 200);

    backend.source.set_utilization(90);
    let shedding = client.get(format!("http://{}/load-shedding", addr)).send().await.unwrap();
    assert_eq!(shedding.status(), 503);
    assert_eq!(backend.admission.counters().dropped_total(), 0);

    backend.shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), backend.handle).await;
}

#[tokio::test]
async fn backend_echoes_frames() {
    let addr: SocketAddr = "127.0.0.1:28321".parse().unwrap();
    let backend = start_backend(addr, 50, 10).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    ws.send(Message::text("ping".to_string())).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::text("ping".to_string()));

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::binary(vec![1u8, 2, 3]));

    assert_eq!(backend.admission.counters().active(), 1);
    ws.close(None).await.unwrap();
    let counters = backend.admission.counters().clone();
    assert!(wait_until(Duration::from_secs(2), || counters.active() == 0).await);

    backend.shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), backend.handle).await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let addr: SocketAddr = "127.0.0.1:28331".parse().unwrap();
    let backend = start_backend(addr, 50, 10).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    let counters = backend.admission.counters().clone();
    assert!(wait_until(Duration::from_secs(2), || counters.active() == 1).await);

    backend.shutdown.trigger();
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("session should be closed by the server");
    assert!(matches!(frame, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    assert!(wait_until(Duration::from_secs(2), || counters.active() == 0).await);
    let _ = tokio::time::timeout(Duration::from_secs(5), backend.handle).await;
}
