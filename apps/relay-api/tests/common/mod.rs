use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use relay_api::config::Config;
use relay_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test configuration: reference capacity, no throttling.
pub fn test_config() -> Config {
    Config {
        click_throttle_ms: 0,
        scroll_throttle_ms: 0,
        ..Config::default()
    }
}

/// Build the full application router wired to a fresh state.
pub async fn test_app_with(config: Config) -> (Router, AppState) {
    let state = AppState::new(config);
    let app = relay_api::routes::router().with_state(state.clone());
    (app, state)
}

pub async fn test_app() -> (Router, AppState) {
    test_app_with(test_config()).await
}

/// Start an actual TCP server (with peer addresses) for WebSocket testing.
pub async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let (app, state) = test_app_with(config).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

/// A browser-shaped event payload.
pub fn event_json(kind: &str, session_id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": kind,
        "timestamp": "2025-03-01T12:00:00.000Z",
        "sessionId": session_id,
        "browser": "Firefox",
        "os": "Linux",
        "details": { "url": "http://localhost:3000/", "referrer": "direct" }
    })
}

/// POST an event to the polling endpoint of a running server.
pub async fn post_event(addr: SocketAddr, payload: &serde_json::Value) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/logs"))
        .json(payload)
        .send()
        .await
        .expect("post request");
    assert!(resp.status().is_success(), "POST failed: {}", resp.status());
    resp.json().await.expect("parse post response")
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Read the next text frame as JSON, failing after 5 seconds.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse message");
            }
            tungstenite::Message::Close(frame) => panic!("connection closed: {frame:?}"),
            _ => continue,
        }
    }
}

/// Read until a message of the given type arrives.
pub async fn next_of_type(ws: &mut WsClient, kind: &str) -> serde_json::Value {
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

/// Connect and consume the `init` + `clientCount` greeting.
pub async fn connect_ready(addr: SocketAddr) -> (WsClient, serde_json::Value) {
    let mut ws = connect(addr).await;
    let init = next_json(&mut ws).await;
    assert_eq!(init["type"], "init");
    let count = next_json(&mut ws).await;
    assert_eq!(count["type"], "clientCount");
    (ws, init)
}
