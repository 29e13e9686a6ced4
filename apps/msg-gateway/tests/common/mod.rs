#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use msg_gateway::config::Config;
use msg_gateway::hub::error::TransportError;
use msg_gateway::hub::platform::Platform;
use msg_gateway::hub::session::{CloseReason, OutboundFrame, Session, SessionTransport};
use msg_gateway::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const ADMIN: &str = "admin";

/// Configuration used by every test: defaults plus one app manager.
pub fn test_config() -> Config {
    Config {
        app_manager_user_ids: vec![ADMIN.to_string()],
        ..Config::default()
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config())
}

/// RPC router over a fresh state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    (rpc_app(&state), state)
}

pub fn rpc_app(state: &AppState) -> Router {
    msg_gateway::routes::router().with_state(state.clone())
}

/// Start the websocket listener on an ephemeral port.
pub async fn start_ws_server(state: AppState) -> SocketAddr {
    let app = msg_gateway::transport::server::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Next non-ping frame, failing the test after five seconds.
pub async fn next_frame(ws: &mut WsClient) -> tungstenite::Message {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => continue,
            other => return other,
        }
    }
}

pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    let msg = next_frame(ws).await;
    let text = msg.into_text().expect("not text");
    serde_json::from_str(&text).expect("parse frame")
}

/// Expect a close frame and return its code.
pub async fn expect_close(ws: &mut WsClient) -> u16 {
    match next_frame(ws).await {
        tungstenite::Message::Close(Some(frame)) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

/// Connect, IDENTIFY and return the client plus the READY payload.
pub async fn identify(
    addr: SocketAddr,
    user_id: &str,
    platform: Platform,
    is_background: bool,
) -> (WsClient, serde_json::Value) {
    let mut ws = connect(addr).await;
    send_json(
        &mut ws,
        serde_json::json!({
            "op": 2,
            "d": {
                "user_id": user_id,
                "platform_id": platform.id(),
                "token": "test-token",
                "is_background": is_background,
            }
        }),
    )
    .await;

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["op"], 0, "READY should be op=0 (DISPATCH)");
    assert_eq!(ready["t"], "READY");
    (ws, ready)
}

/// Send a heartbeat and wait for its ACK, so every frame sent before it has
/// been processed by the server.
pub async fn sync(ws: &mut WsClient, seq: u64) {
    send_json(ws, serde_json::json!({ "op": 1, "d": { "seq": seq } })).await;
    let ack = next_json(ws).await;
    assert_eq!(ack["op"], 6);
    assert_eq!(ack["d"]["ack"], seq);
}

/// Wait until `check` holds, polling the state for up to five seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(time::Instant::now() < deadline, "condition not reached in time");
        time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// In-process sessions for RPC tests
// ---------------------------------------------------------------------------

/// Transport that records frames instead of writing to a socket.
#[derive(Default)]
pub struct RecordingTransport {
    pub frames: Mutex<Vec<OutboundFrame>>,
    pub closed: Mutex<Option<CloseReason>>,
    pub broken: bool,
}

impl RecordingTransport {
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn push_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Push { .. }))
            .count()
    }
}

#[async_trait]
impl SessionTransport for RecordingTransport {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        *self.closed.lock() = Some(reason);
        Ok(())
    }
}

/// Attach an in-process session through the hub.
pub async fn attach(
    state: &AppState,
    user_id: &str,
    platform: Platform,
    is_background: bool,
    transport: RecordingTransport,
) -> (Arc<Session>, Arc<RecordingTransport>) {
    let transport = Arc::new(transport);
    let session = Arc::new(Session::new(
        user_id.to_string(),
        platform,
        is_background,
        transport.clone(),
    ));
    state.hub.attach(session.clone()).await;
    (session, transport)
}
