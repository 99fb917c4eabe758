use futures_util::{SinkExt, StreamExt};
use grocery_core::link::transport::WebSocketConnector;
use grocery_core::{ConnectionManager, ConnectionState, Endpoint, ReconnectPolicy};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

fn manager(heartbeat: Duration) -> ConnectionManager {
    let connector = WebSocketConnector::new(heartbeat, Duration::from_secs(2));
    ConnectionManager::new(Arc::new(connector), ReconnectPolicy::Manual)
}

async fn next_text(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    tokio::time::timeout(WAIT, rx.wait_for(|state| *state == wanted))
        .await
        .expect("state change timed out")
        .expect("state channel closed");
}

#[tokio::test]
async fn loopback_session_streams_telemetry_and_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let first = next_text(&mut ws).await;
        ws.send(Message::Text(
            r#"{"type":"status","battery":55,"tracking":true,"detected_object":"apples"}"#
                .to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();
        let second = next_text(&mut ws).await;
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        (first, second)
    });

    let manager = manager(Duration::from_secs(30));
    let mut states = manager.subscribe_state();
    let mut telemetry = manager.subscribe_telemetry();
    manager.connect(Endpoint::new("127.0.0.1", port)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);

    tokio::time::timeout(WAIT, telemetry.changed())
        .await
        .unwrap()
        .unwrap();
    let snapshot = manager.telemetry();
    assert_eq!(snapshot.battery, 55);
    assert!(snapshot.tracking);
    assert_eq!(snapshot.detected_object, "apples");

    assert!(manager.calibrate());
    wait_for_state(&mut states, ConnectionState::Disconnected).await;
    assert_eq!(manager.telemetry(), snapshot);

    let (first, second) = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert_eq!(first["command"], "start_video_stream");
    assert_eq!(second["command"], "calibrate");
    assert!(second["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn refused_connection_is_errored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = manager(Duration::from_secs(30));
    manager.connect(Endpoint::new("127.0.0.1", port)).await;
    assert_eq!(manager.state(), ConnectionState::Errored);
    assert!(!manager.request_status());
}

#[tokio::test]
async fn silent_peer_trips_the_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        // Never read, so pings are never answered.
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(ws);
    });

    let manager = manager(Duration::from_millis(50));
    let mut states = manager.subscribe_state();
    manager.connect(Endpoint::new("127.0.0.1", port)).await;
    wait_for_state(&mut states, ConnectionState::Errored).await;

    server.abort();
}

#[tokio::test]
async fn client_disconnect_closes_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
        let _ = next_text(&mut ws).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    });

    let manager = manager(Duration::from_secs(30));
    manager.connect(Endpoint::new("127.0.0.1", port)).await;
    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(tokio::time::timeout(WAIT, server).await.unwrap().unwrap());
}
