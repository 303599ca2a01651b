//! Integration tests for the listener loop against a mock gateway WebSocket.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use client::client::GatewayClient;
use client::config::GatewayConfig;
use client::event::InboundEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Clone)]
struct WsState {
    /// Text frames pushed to every client right after it connects.
    frames: Arc<Vec<String>>,
    connections: Arc<AtomicUsize>,
}

async fn ws_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: WsState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    for frame in state.frames.iter() {
        if socket.send(WsMessage::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    // Hold the connection open until the client goes away.
    while let Some(msg) = socket.recv().await {
        if msg.is_err() {
            return;
        }
    }
}

/// Start a mock gateway serving /ws; returns its port and connection counter.
async fn serve_ws(frames: Vec<String>) -> (u16, Arc<AtomicUsize>) {
    let state = WsState {
        frames: Arc::new(frames),
        connections: Arc::new(AtomicUsize::new(0)),
    };
    let connections = Arc::clone(&state.connections);
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (port, connections)
}

fn test_client(port: u16) -> GatewayClient {
    GatewayClient::new(GatewayConfig {
        base_url: format!("http://127.0.0.1:{}", port),
        ..GatewayConfig::default()
    })
}

async fn collecting_subscriber(
    gateway: &GatewayClient,
) -> mpsc::UnboundedReceiver<InboundEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    gateway
        .router()
        .subscribe_fn(move |event| {
            let _ = tx.send(event);
        })
        .await;
    rx
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn end_to_end_event_reaches_subscriber() {
    let (port, _connections) = serve_ws(vec![
        r#"{"content":"hello","sender":"u1","room_id":"r1","timestamp":123}"#.to_string(),
    ])
    .await;

    let gateway = test_client(port);
    let mut rx = collecting_subscriber(&gateway).await;
    gateway.start().await;

    let event = recv_event(&mut rx).await;
    assert_eq!(event.content, "hello");
    assert_eq!(event.sender, "u1");
    assert_eq!(event.room_id, "r1");
    assert_eq!(event.timestamp, serde_json::json!(123));
    let received_at = event.received_at.to_rfc3339();
    assert!(!received_at.is_empty());
    assert_ne!(serde_json::json!(received_at), event.timestamp);

    gateway.stop().await;
}

#[tokio::test]
async fn malformed_frame_is_skipped_without_reconnect() {
    let (port, connections) = serve_ws(vec![
        "this is not json".to_string(),
        r#"{"content":"one"}"#.to_string(),
        r#"{"content":"two"}"#.to_string(),
        r#"{"content":"three"}"#.to_string(),
    ])
    .await;

    let gateway = test_client(port);
    let mut rx = collecting_subscriber(&gateway).await;
    gateway.start().await;

    assert_eq!(recv_event(&mut rx).await.content, "one");
    assert_eq!(recv_event(&mut rx).await.content, "two");
    assert_eq!(recv_event(&mut rx).await.content, "three");

    // The bad frame produced no event and did not drop the connection.
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(rx.try_recv().is_err());

    gateway.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_is_clean() {
    let (port, connections) = serve_ws(Vec::new()).await;
    let gateway = test_client(port);

    gateway.start().await;
    gateway.start().await;
    assert!(gateway.is_running().await);

    // Wait for the single listener to connect.
    let deadline = Instant::now() + Duration::from_secs(5);
    while connections.load(Ordering::SeqCst) < 1 {
        assert!(Instant::now() < deadline, "listener never connected");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    gateway.stop().await;
    assert!(!gateway.is_running().await);
    gateway.stop().await;

    // start() after stop() brings up a fresh listener.
    gateway.start().await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while connections.load(Ordering::SeqCst) < 2 {
        assert!(Instant::now() < deadline, "listener did not reconnect after restart");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    gateway.stop().await;
    assert!(!gateway.is_running().await);
}

#[tokio::test]
async fn stop_interrupts_backoff_wait() {
    // Nothing listening: every connect fails fast, then the loop sleeps.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);

    let gateway = GatewayClient::new(GatewayConfig {
        base_url: format!("http://127.0.0.1:{}", port),
        initial_backoff_secs: 60,
        ..GatewayConfig::default()
    });
    gateway.start().await;

    // Give the loop time to fail its first connect and enter the backoff sleep.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), gateway.stop())
        .await
        .expect("stop() must not wait out the 60s backoff");
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "stop took {:?}",
        started.elapsed()
    );
    assert!(!gateway.is_running().await);
}
