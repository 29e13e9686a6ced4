//! Hook for client-originated requests (opcode REQUEST).
//!
//! The gateway does not interpret request bodies. One handler is installed
//! per process; its answer goes back to the client as a RESPONSE dispatch.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::hub::platform::Platform;

/// A REQUEST frame together with the identity of the session that sent it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub conn_id: String,
    pub user_id: String,
    pub platform: Platform,
    pub req_identifier: i32,
    pub msg_incr: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request rejected ({code}): {message}")]
pub struct RequestRejected {
    pub code: i32,
    pub message: String,
}

impl RequestRejected {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, request: InboundRequest) -> Result<Value, RequestRejected>;
}

/// Code returned when no handler understands the request.
pub const UNSUPPORTED_REQUEST: i32 = 1001;

/// Installed when the embedding application provides no handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl InboundHandler for RejectAll {
    async fn handle(&self, request: InboundRequest) -> Result<Value, RequestRejected> {
        tracing::debug!(
            conn_id = %request.conn_id,
            req_identifier = request.req_identifier,
            "no inbound handler installed"
        );
        Err(RequestRejected::new(UNSUPPORTED_REQUEST, "unsupported request"))
    }
}

/// Body of the RESPONSE dispatch for a handled request.
pub fn response_body(request: &InboundRequest, outcome: Result<Value, RequestRejected>) -> Value {
    let (err_code, err_msg, data) = match outcome {
        Ok(data) => (0, String::new(), data),
        Err(rejected) => (rejected.code, rejected.message, Value::Null),
    };
    serde_json::json!({
        "req_identifier": request.req_identifier,
        "msg_incr": request.msg_incr,
        "err_code": err_code,
        "err_msg": err_msg,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InboundRequest {
        InboundRequest {
            conn_id: "conn_1".into(),
            user_id: "u1".into(),
            platform: Platform::Web,
            req_identifier: 1003,
            msg_incr: "7".into(),
            data: Value::Null,
        }
    }

    #[tokio::test]
    async fn default_handler_rejects() {
        let req = request();
        let outcome = RejectAll.handle(req.clone()).await;
        let body = response_body(&req, outcome);
        assert_eq!(body["err_code"], UNSUPPORTED_REQUEST);
        assert_eq!(body["err_msg"], "unsupported request");
        assert_eq!(body["msg_incr"], "7");
    }

    #[test]
    fn success_carries_data() {
        let req = request();
        let body = response_body(&req, Ok(serde_json::json!({"seq": 9})));
        assert_eq!(body["err_code"], 0);
        assert_eq!(body["data"]["seq"], 9);
        assert_eq!(body["req_identifier"], 1003);
    }
}
