//! Gateway opcodes, event names, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_SET_BACKGROUND: u8 = 3;
pub const OP_REQUEST: u8 = 4;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_KICKED: u8 = 8;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }

    /// Build a KICKED message (op=8), sent right before the server closes.
    pub fn kicked(code: u16, reason: &str) -> Self {
        Self {
            op: OP_KICKED,
            t: None,
            s: None,
            d: serde_json::json!({ "code": code, "reason": reason }),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// IDENTIFY payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub user_id: String,
    pub platform_id: i32,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub is_background: bool,
}

// ---------------------------------------------------------------------------
// HEARTBEAT payload
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// SET_BACKGROUND payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetBackgroundPayload {
    pub is_background: bool,
}

// ---------------------------------------------------------------------------
// REQUEST payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RequestPayload {
    /// Client-chosen correlation ID echoed in the RESPONSE.
    #[serde(default)]
    pub msg_incr: String,
    pub req_identifier: i32,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const PUSH_MESSAGE: &'static str = "PUSH_MESSAGE";
    pub const RESPONSE: &'static str = "RESPONSE";
}
