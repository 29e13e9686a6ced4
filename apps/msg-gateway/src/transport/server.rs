//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::time;

use crate::error::ApiError;
use crate::hub::platform::Platform;
use crate::hub::session::Session;
use crate::AppState;

use super::events::{
    ClientMessage, EventName, GatewayMessage, HeartbeatPayload, IdentifyPayload, RequestPayload,
    SetBackgroundPayload, OP_HEARTBEAT, OP_IDENTIFY, OP_REQUEST, OP_SET_BACKGROUND,
};
use super::handler::{response_body, InboundRequest};
use super::socket::WsTransport;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_DECODE_ERROR: u16 = 4002;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_ALREADY_AUTHENTICATED: u16 = 4005;
const CLOSE_INVALID_PLATFORM: u16 = 4006;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

type HandshakeError = (u16, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
        tracing::warn!(
            max = state.config.max_conn_num,
            "connection limit reached, rejecting upgrade"
        );
        return ApiError::service_unavailable("Too many connections").into_response();
    };

    let max_len = state.config.max_msg_len;
    ws.max_message_size(max_len)
        .max_frame_size(max_len)
        .on_upgrade(move |socket| async move {
            handle_connection(socket, state).await;
            drop(permit);
        })
        .into_response()
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (transport, writer_done) = WsTransport::spawn(ws_tx, state.config.write_buffer);
    state.metrics.connection_opened();

    // Step 1: IDENTIFY within the handshake timeout.
    let identify = match time::timeout(state.config.handshake_timeout, read_identify(&mut ws_rx)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err((code, reason))) => {
            tracing::debug!(%reason, "handshake failed");
            let _ = transport.close_with(code, reason).await;
            state.metrics.connection_closed();
            return;
        }
        Err(_timeout) => {
            let _ = transport
                .close_with(CLOSE_SESSION_TIMEOUT, "Handshake timeout")
                .await;
            state.metrics.connection_closed();
            return;
        }
    };

    // Step 2: validate and build the session.
    let session = match admit(&state, identify, &transport).await {
        Ok(session) => session,
        Err((code, reason)) => {
            tracing::debug!(%reason, "identify rejected");
            let _ = transport.close_with(code, reason).await;
            state.metrics.connection_closed();
            return;
        }
    };

    let _guard = ConnectionGuard {
        state: state.clone(),
        session: session.clone(),
    };

    // Step 3: READY, then registration.
    if !establish(&state, &session, &transport).await {
        return;
    }

    tracing::info!(
        conn_id = %session.conn_id,
        user_id = %session.user_id,
        platform = %session.platform,
        is_background = session.is_background(),
        "gateway session established"
    );

    run_session(&state, &session, &transport, ws_rx, writer_done).await;
}

/// Detaches the session and counts the connection as closed when dropped,
/// so a connection task that unwinds still leaves the registry. Detach is a
/// no-op for a session that never got attached.
struct ConnectionGuard {
    state: AppState,
    session: Arc<Session>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.hub.detach(&self.session);
        self.state.metrics.connection_closed();
        tracing::info!(
            conn_id = %self.session.conn_id,
            user_id = %self.session.user_id,
            connected_ms = (Utc::now() - self.session.created_at()).num_milliseconds(),
            "gateway session ended"
        );
    }
}

/// Write READY and only then attach the session.
///
/// READY is on the socket before the session is registered, so it is the
/// first frame the client sees and a client that cannot take it never
/// supersedes anyone.
async fn establish(state: &AppState, session: &Arc<Session>, transport: &WsTransport) -> bool {
    let ready = GatewayMessage::dispatch(
        EventName::READY,
        session.next_seq(),
        serde_json::json!({
            "conn_id": session.conn_id,
            "user_id": session.user_id,
            "platform_id": session.platform.id(),
            "heartbeat_interval": state.config.heartbeat_interval.as_millis() as u64,
        }),
    );
    if let Err(e) = transport.send_message(&ready).await {
        tracing::debug!(conn_id = %session.conn_id, error = %e, "READY not written");
        return false;
    }
    state.hub.attach(session.clone()).await
}

/// Wait for the first meaningful client frame, which must be IDENTIFY.
async fn read_identify(ws_rx: &mut SplitStream<WebSocket>) -> Result<IdentifyPayload, HandshakeError> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, "ws read error during identify");
                return Err((CLOSE_UNKNOWN_ERROR, "read error"));
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return Err((CLOSE_UNKNOWN_ERROR, "client closed")),
            _ => continue,
        };

        let client_msg: ClientMessage =
            serde_json::from_str(&text).map_err(|_| (CLOSE_DECODE_ERROR, "Invalid JSON"))?;

        if client_msg.op != OP_IDENTIFY {
            return Err((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY"));
        }
        return serde_json::from_value(client_msg.d)
            .map_err(|_| (CLOSE_DECODE_ERROR, "Invalid identify payload"));
    }
    Err((CLOSE_UNKNOWN_ERROR, "connection closed before identify"))
}

/// Check the IDENTIFY payload and build the session for it.
async fn admit(
    state: &AppState,
    payload: IdentifyPayload,
    transport: &WsTransport,
) -> Result<Arc<Session>, HandshakeError> {
    if payload.user_id.is_empty() {
        return Err((CLOSE_AUTH_FAILED, "Missing user_id"));
    }
    let platform =
        Platform::from_id(payload.platform_id).ok_or((CLOSE_INVALID_PLATFORM, "Unknown platform"))?;

    state
        .verifier
        .verify(&payload.user_id, platform, &payload.token)
        .await
        .map_err(|reason| (CLOSE_AUTH_FAILED, reason))?;

    Ok(Arc::new(Session::new(
        payload.user_id,
        platform,
        payload.is_background,
        Arc::new(transport.clone()),
    )))
}

/// Main session event loop: read client frames, answer heartbeats, enforce
/// the heartbeat deadline, and stop once the writer has shut down.
async fn run_session(
    state: &AppState,
    session: &Arc<Session>,
    transport: &WsTransport,
    mut ws_rx: SplitStream<WebSocket>,
    mut writer_done: watch::Receiver<bool>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = state.config.heartbeat_interval * 3 / 2;
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = transport.close_with(CLOSE_DECODE_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or_default();
                                if transport.send_message(&GatewayMessage::heartbeat_ack(payload.seq)).await.is_err() {
                                    break;
                                }
                            }
                            OP_SET_BACKGROUND => {
                                let Ok(payload) = serde_json::from_value::<SetBackgroundPayload>(client_msg.d) else {
                                    let _ = transport.close_with(CLOSE_DECODE_ERROR, "Invalid SET_BACKGROUND payload").await;
                                    break;
                                };
                                session.set_background(payload.is_background);
                                tracing::debug!(
                                    conn_id = %session.conn_id,
                                    is_background = payload.is_background,
                                    "background flag changed"
                                );
                            }
                            OP_REQUEST => {
                                let Ok(payload) = serde_json::from_value::<RequestPayload>(client_msg.d) else {
                                    let _ = transport.close_with(CLOSE_DECODE_ERROR, "Invalid REQUEST payload").await;
                                    break;
                                };
                                let reply = handle_request(state, session, payload).await;
                                if transport.send_message(&reply).await.is_err() {
                                    break;
                                }
                            }
                            OP_IDENTIFY => {
                                let _ = transport.close_with(CLOSE_ALREADY_AUTHENTICATED, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = transport.close_with(CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, conn_id = %session.conn_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // The writer stopped: kicked, superseded, shut down or a failed write.
            _ = writer_done.changed() => break,

            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        conn_id = %session.conn_id,
                        last_active = %session.last_active(),
                        "heartbeat timeout, closing connection"
                    );
                    let _ = transport.close_with(CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

async fn handle_request(state: &AppState, session: &Session, payload: RequestPayload) -> GatewayMessage {
    let request = InboundRequest {
        conn_id: session.conn_id.clone(),
        user_id: session.user_id.clone(),
        platform: session.platform,
        req_identifier: payload.req_identifier,
        msg_incr: payload.msg_incr,
        data: payload.data,
    };
    let outcome = state.inbound.handle(request.clone()).await;
    if let Err(rejected) = &outcome {
        tracing::debug!(conn_id = %session.conn_id, error = %rejected, "inbound request rejected");
    }
    GatewayMessage::dispatch(EventName::RESPONSE, session.next_seq(), response_body(&request, outcome))
}
