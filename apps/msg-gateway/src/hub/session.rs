//! One live client connection and the transport seam it writes through.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time;
use utoipa::ToSchema;

use super::error::TransportError;
use super::platform::Platform;

/// Routing envelope of a message pushed to sessions. The hub never looks
/// inside `content`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct MsgData {
    pub send_id: String,
    pub recv_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub client_msg_id: String,
    pub server_msg_id: String,
    pub session_type: i32,
    pub content_type: i32,
    #[schema(value_type = Object)]
    pub content: Value,
    pub seq: i64,
    pub send_time: i64,
}

/// Why the server is closing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Administrative kick.
    Kicked,
    /// A newer login on a conflicting platform took over.
    Superseded,
    /// The gateway is stopping.
    Shutdown,
}

impl CloseReason {
    /// Application close code (4000 range).
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Kicked => 4010,
            CloseReason::Superseded => 4011,
            CloseReason::Shutdown => 4012,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Kicked => "kicked",
            CloseReason::Superseded => "superseded by new login",
            CloseReason::Shutdown => "server shutdown",
        }
    }
}

/// Frames the hub asks a transport to write.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Push { seq: u64, msg: Arc<MsgData> },
    /// Forced-logout signal sent before the transport is torn down.
    Kicked { reason: CloseReason },
}

/// Write side of one connection, owned by the transport front door.
///
/// `send` resolves once the frame is written (or failed). `close` must not
/// block on the remote peer.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;
    async fn close(&self, reason: CloseReason) -> Result<(), TransportError>;
}

/// State for a single attached connection.
pub struct Session {
    /// Unique per attach (`conn_` prefixed ULID).
    pub conn_id: String,
    pub user_id: String,
    pub platform: Platform,
    background: AtomicBool,
    seq: AtomicU64,
    created_at: DateTime<Utc>,
    last_active: Mutex<DateTime<Utc>>,
    transport: Arc<dyn SessionTransport>,
}

impl Session {
    pub fn new(
        user_id: String,
        platform: Platform,
        is_background: bool,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        let now = Utc::now();
        Self {
            conn_id: prefixed_ulid(prefix::CONNECTION),
            user_id,
            platform,
            background: AtomicBool::new(is_background),
            seq: AtomicU64::new(0),
            created_at: now,
            last_active: Mutex::new(now),
            transport,
        }
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::Acquire)
    }

    pub fn set_background(&self, is_background: bool) {
        self.background.store(is_background, Ordering::Release);
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_active.lock() = Utc::now();
    }

    /// Next sequence number for a dispatch on this connection.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write one message to the peer, bounded by `deadline`.
    pub async fn push(&self, msg: Arc<MsgData>, deadline: Duration) -> Result<(), TransportError> {
        let frame = OutboundFrame::Push {
            seq: self.next_seq(),
            msg,
        };
        time::timeout(deadline, self.transport.send(frame))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Send the forced-logout signal, then tear the transport down.
    ///
    /// A peer that does not take the signal within `deadline` is closed
    /// anyway. A transport that fails outright is reported.
    pub async fn kick(&self, reason: CloseReason, deadline: Duration) -> Result<(), TransportError> {
        match time::timeout(deadline, self.transport.send(OutboundFrame::Kicked { reason })).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(
                    conn_id = %self.conn_id,
                    user_id = %self.user_id,
                    reason = reason.as_str(),
                    "kick signal not taken before deadline, forcing close"
                );
            }
        }
        self.transport.close(reason).await
    }

    /// Close without a logout signal (shutdown path).
    pub async fn close(&self, reason: CloseReason) -> Result<(), TransportError> {
        self.transport.close(reason).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("is_background", &self.is_background())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn conn_ids_are_prefixed_and_unique() {
        let (a, _) = session("u1", Platform::Ios, false);
        let (b, _) = session("u1", Platform::Ios, false);
        assert!(a.conn_id.starts_with("conn_"));
        assert_ne!(a.conn_id, b.conn_id);
    }

    #[test]
    fn background_flag_toggles() {
        let (s, _) = session("u1", Platform::Android, true);
        assert!(s.is_background());
        s.set_background(false);
        assert!(!s.is_background());
    }

    #[test]
    fn touch_advances_last_active() {
        let (s, _) = session("u1", Platform::Web, false);
        let before = s.last_active();
        std::thread::sleep(Duration::from_millis(2));
        s.touch();
        assert!(s.last_active() > before);
        assert_eq!(s.created_at(), before);
    }

    #[tokio::test]
    async fn push_assigns_increasing_seq() {
        let (s, t) = session("u1", Platform::Ios, false);
        let msg = Arc::new(MsgData::default());
        s.push(msg.clone(), Duration::from_secs(1)).await.unwrap();
        s.push(msg, Duration::from_secs(1)).await.unwrap();

        let seqs: Vec<u64> = t
            .sent
            .lock()
            .iter()
            .filter_map(|f| match f {
                OutboundFrame::Push { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn push_times_out_on_slow_transport() {
        let (s, _) = session_with("u1", Platform::Ios, false, MockTransport::slow(Duration::from_secs(10)));
        let err = s
            .push(Arc::new(MsgData::default()), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_force_closes_when_signal_times_out() {
        let (s, t) = session_with("u1", Platform::Web, false, MockTransport::slow(Duration::from_secs(10)));
        s.kick(CloseReason::Kicked, Duration::from_millis(50)).await.unwrap();
        assert_eq!(*t.closed.lock(), Some(CloseReason::Kicked));
    }

    #[tokio::test]
    async fn kick_reports_broken_transport() {
        let (s, t) = session_with("u1", Platform::Web, false, MockTransport::failing());
        let err = s.kick(CloseReason::Kicked, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
        assert!(t.closed.lock().is_none());
    }
}
