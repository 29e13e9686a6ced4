//! Push fanout: deliver one message to every session of a set of users.
//!
//! Sessions are snapshotted from the registry and delivered to with no
//! registry lock held. Deliveries run concurrently, but results are
//! assembled in target order and registry snapshot order. A failed session
//! never aborts the others; the call always returns a complete result set.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::metrics::PushMetrics;
use super::platform::{delivery_for, Delivery, Platform, PushTerminals};
use super::registry::ConnectionRegistry;
use super::session::{MsgData, Session};

/// Outcome of one session, serialized as its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum PushResultCode {
    Delivered,
    DeliveryFailed,
    Suppressed,
}

impl From<PushResultCode> for i32 {
    fn from(code: PushResultCode) -> Self {
        match code {
            PushResultCode::Delivered => 0,
            PushResultCode::DeliveryFailed => -2,
            PushResultCode::Suppressed => -3,
        }
    }
}

impl TryFrom<i32> for PushResultCode {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PushResultCode::Delivered),
            -2 => Ok(PushResultCode::DeliveryFailed),
            -3 => Ok(PushResultCode::Suppressed),
            other => Err(format!("unknown push result code {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PerSessionResult {
    pub recipient_id: String,
    #[schema(value_type = i32)]
    pub platform_id: Platform,
    #[schema(value_type = i32)]
    pub result_code: PushResultCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PerUserResult {
    pub user_id: String,
    /// A push-eligible terminal took the message online, so no external
    /// push notification is owed.
    pub online_push_achieved: bool,
    pub per_session_results: Vec<PerSessionResult>,
}

/// How the caller derived the target set. Only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutKind {
    Batch,
    SuperGroup,
}

impl FanoutKind {
    fn as_str(self) -> &'static str {
        match self {
            FanoutKind::Batch => "batch",
            FanoutKind::SuperGroup => "super_group",
        }
    }
}

pub struct FanoutEngine {
    registry: Arc<ConnectionRegistry>,
    terminals: PushTerminals,
    metrics: Arc<dyn PushMetrics>,
    default_timeout: Duration,
}

impl FanoutEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        terminals: PushTerminals,
        metrics: Arc<dyn PushMetrics>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            terminals,
            metrics,
            default_timeout,
        }
    }

    /// Deliver `msg` to every online session of `targets`.
    ///
    /// Users with no sessions produce no entry. `timeout` bounds each
    /// per-session delivery; `None` uses the configured default.
    pub async fn fanout(
        &self,
        kind: FanoutKind,
        targets: &[String],
        msg: MsgData,
        timeout: Option<Duration>,
    ) -> Vec<PerUserResult> {
        let deadline = timeout.unwrap_or(self.default_timeout);
        let msg = Arc::new(msg);

        let per_user = targets
            .iter()
            .map(|user_id| self.fanout_user(user_id, msg.clone(), deadline));
        let results: Vec<PerUserResult> = join_all(per_user).await.into_iter().flatten().collect();

        tracing::debug!(
            kind = kind.as_str(),
            server_msg_id = %msg.server_msg_id,
            targets = targets.len(),
            online_users = results.len(),
            "fanout complete"
        );
        results
    }

    async fn fanout_user(
        &self,
        user_id: &str,
        msg: Arc<MsgData>,
        deadline: Duration,
    ) -> Option<PerUserResult> {
        let sessions = self.registry.lookup_all(user_id)?;

        let outcomes = join_all(
            sessions
                .into_iter()
                .map(|s| self.deliver(s, msg.clone(), deadline)),
        )
        .await;

        let mut online_push_achieved = false;
        let mut per_session_results = Vec::new();
        for (result, achieved) in outcomes {
            online_push_achieved |= achieved;
            per_session_results.extend(result);
        }

        Some(PerUserResult {
            user_id: user_id.to_string(),
            online_push_achieved,
            per_session_results,
        })
    }

    /// Returns the session's result (if it is reported) and whether it
    /// achieved an online push.
    async fn deliver(
        &self,
        session: Arc<Session>,
        msg: Arc<MsgData>,
        deadline: Duration,
    ) -> (Option<PerSessionResult>, bool) {
        let result = |code| PerSessionResult {
            recipient_id: session.user_id.clone(),
            platform_id: session.platform,
            result_code: code,
        };

        match delivery_for(session.platform, session.is_background(), &self.terminals) {
            Delivery::Suppress => (Some(result(PushResultCode::Suppressed)), false),
            Delivery::Attempt { counts_as_push } => match session.push(msg, deadline).await {
                Err(e) => {
                    tracing::debug!(
                        conn_id = %session.conn_id,
                        user_id = %session.user_id,
                        platform = %session.platform,
                        error = %e,
                        "online push failed"
                    );
                    (Some(result(PushResultCode::DeliveryFailed)), false)
                }
                Ok(()) if counts_as_push => {
                    self.metrics.inc_push_success();
                    (Some(result(PushResultCode::Delivered)), true)
                }
                // Delivered to a terminal that does not settle the offline
                // push decision: intentionally not reported.
                Ok(()) => (None, false),
            },
        }
    }
}
