//! RPC endpoints other services call on the gateway.

use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{OperationId, Operator};
use crate::error::{ApiError, ApiErrorBody};
use crate::hub::error::HubError;
use crate::hub::fanout::{FanoutKind, PerUserResult};
use crate::hub::platform::Platform;
use crate::hub::presence::PresenceSnapshot;
use crate::hub::session::MsgData;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/get_users_online_status", post(get_users_online_status))
        .route("/online_batch_push_one_msg", post(online_batch_push_one_msg))
        .route(
            "/super_group_online_batch_push_one_msg",
            post(super_group_online_batch_push_one_msg),
        )
        .route("/kick_user_offline", post(kick_user_offline))
        .route("/multi_terminal_login_check", post(multi_terminal_login_check))
}

fn parse_platform(platform_id: i32) -> Result<Platform, HubError> {
    Platform::from_id(platform_id)
        .ok_or_else(|| HubError::InvalidArgument(format!("unknown platform_id {platform_id}")))
}

// ---------------------------------------------------------------------------
// POST /msg_gateway/get_users_online_status
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct GetUsersOnlineStatusRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GetUsersOnlineStatusResponse {
    pub success_result: Vec<PresenceSnapshot>,
}

#[utoipa::path(
    post,
    path = "/msg_gateway/get_users_online_status",
    tag = "Gateway",
    request_body = GetUsersOnlineStatusRequest,
    params(
        ("x-op-user-id" = String, Header, description = "Operator user ID"),
        ("x-operation-id" = Option<String>, Header, description = "Trace ID"),
    ),
    responses(
        (status = 200, description = "Online users among the requested", body = GetUsersOnlineStatusResponse),
        (status = 401, description = "Missing operator", body = ApiErrorBody),
        (status = 403, description = "Operator is not an app manager", body = ApiErrorBody),
    ),
)]
#[tracing::instrument(skip_all, fields(operation_id = %operator.operation_id, op_user_id = %operator.user_id))]
pub async fn get_users_online_status(
    operator: Operator,
    State(state): State<AppState>,
    Json(body): Json<GetUsersOnlineStatusRequest>,
) -> Result<Json<GetUsersOnlineStatusResponse>, ApiError> {
    let success_result = state.hub.presence.get_online_status(&operator, &body.user_ids)?;
    Ok(Json(GetUsersOnlineStatusResponse { success_result }))
}

// ---------------------------------------------------------------------------
// POST /msg_gateway/online_batch_push_one_msg
// POST /msg_gateway/super_group_online_batch_push_one_msg
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct OnlineBatchPushOneMsgRequest {
    pub push_to_user_ids: Vec<String>,
    pub msg_data: MsgData,
    /// Per-session delivery deadline; the configured default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineBatchPushOneMsgResponse {
    pub single_push_result: Vec<PerUserResult>,
}

#[utoipa::path(
    post,
    path = "/msg_gateway/online_batch_push_one_msg",
    tag = "Gateway",
    request_body = OnlineBatchPushOneMsgRequest,
    responses(
        (status = 200, description = "Per-user delivery results", body = OnlineBatchPushOneMsgResponse),
    ),
)]
#[tracing::instrument(skip_all, fields(operation_id = %operation_id.0))]
pub async fn online_batch_push_one_msg(
    operation_id: OperationId,
    State(state): State<AppState>,
    Json(body): Json<OnlineBatchPushOneMsgRequest>,
) -> Json<OnlineBatchPushOneMsgResponse> {
    push(&state, FanoutKind::Batch, body).await
}

#[utoipa::path(
    post,
    path = "/msg_gateway/super_group_online_batch_push_one_msg",
    tag = "Gateway",
    request_body = OnlineBatchPushOneMsgRequest,
    responses(
        (status = 200, description = "Per-user delivery results", body = OnlineBatchPushOneMsgResponse),
    ),
)]
#[tracing::instrument(skip_all, fields(operation_id = %operation_id.0))]
pub async fn super_group_online_batch_push_one_msg(
    operation_id: OperationId,
    State(state): State<AppState>,
    Json(body): Json<OnlineBatchPushOneMsgRequest>,
) -> Json<OnlineBatchPushOneMsgResponse> {
    push(&state, FanoutKind::SuperGroup, body).await
}

async fn push(
    state: &AppState,
    kind: FanoutKind,
    body: OnlineBatchPushOneMsgRequest,
) -> Json<OnlineBatchPushOneMsgResponse> {
    let timeout = body.timeout_ms.map(Duration::from_millis);
    let single_push_result = state
        .hub
        .fanout
        .fanout(kind, &body.push_to_user_ids, body.msg_data, timeout)
        .await;
    Json(OnlineBatchPushOneMsgResponse { single_push_result })
}

// ---------------------------------------------------------------------------
// POST /msg_gateway/kick_user_offline
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct KickUserOfflineRequest {
    pub kick_user_id_list: Vec<String>,
    pub platform_id: i32,
    /// Deadline for each session to take the kick signal before it is
    /// force-closed; the configured default when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KickUserOfflineResponse {}

#[utoipa::path(
    post,
    path = "/msg_gateway/kick_user_offline",
    tag = "Gateway",
    request_body = KickUserOfflineRequest,
    responses(
        (status = 200, description = "All matching sessions closed", body = KickUserOfflineResponse),
        (status = 400, description = "Unknown platform", body = ApiErrorBody),
        (status = 500, description = "A session could not be closed", body = ApiErrorBody),
    ),
)]
#[tracing::instrument(skip_all, fields(operation_id = %operation_id.0))]
pub async fn kick_user_offline(
    operation_id: OperationId,
    State(state): State<AppState>,
    Json(body): Json<KickUserOfflineRequest>,
) -> Result<Json<KickUserOfflineResponse>, ApiError> {
    let platform = parse_platform(body.platform_id)?;
    state
        .hub
        .eviction
        .kick_users(
            &body.kick_user_id_list,
            platform,
            body.timeout_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(KickUserOfflineResponse {}))
}

// ---------------------------------------------------------------------------
// POST /msg_gateway/multi_terminal_login_check
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct MultiTerminalLoginCheckRequest {
    pub user_id: String,
    pub platform_id: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MultiTerminalLoginCheckResponse {
    pub kicked_conn_ids: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/msg_gateway/multi_terminal_login_check",
    tag = "Gateway",
    request_body = MultiTerminalLoginCheckRequest,
    responses(
        (status = 200, description = "Conflicting local sessions evicted", body = MultiTerminalLoginCheckResponse),
        (status = 400, description = "Unknown platform or empty user", body = ApiErrorBody),
    ),
)]
#[tracing::instrument(skip_all, fields(operation_id = %operation_id.0))]
pub async fn multi_terminal_login_check(
    operation_id: OperationId,
    State(state): State<AppState>,
    Json(body): Json<MultiTerminalLoginCheckRequest>,
) -> Result<Json<MultiTerminalLoginCheckResponse>, ApiError> {
    if body.user_id.is_empty() {
        return Err(HubError::InvalidArgument("user_id is required".into()).into());
    }
    let platform = parse_platform(body.platform_id)?;
    let kicked_conn_ids = state.hub.resolver.check_login(&body.user_id, platform).await;
    Ok(Json(MultiTerminalLoginCheckResponse { kicked_conn_ids }))
}
