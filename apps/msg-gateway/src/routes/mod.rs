pub mod gateway;
pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

/// Routes served on the RPC listener.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/msg_gateway", gateway::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        health::metrics,
        // Gateway
        gateway::get_users_online_status,
        gateway::online_batch_push_one_msg,
        gateway::super_group_online_batch_push_one_msg,
        gateway::kick_user_offline,
        gateway::multi_terminal_login_check,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            // Hub types
            crate::hub::session::MsgData,
            crate::hub::presence::PresenceSnapshot,
            crate::hub::presence::PlatformStatus,
            crate::hub::presence::OnlineStatus,
            crate::hub::fanout::PerUserResult,
            crate::hub::fanout::PerSessionResult,
            crate::hub::metrics::MetricsSnapshot,
            // Route request/response types
            health::HealthResponse,
            gateway::GetUsersOnlineStatusRequest,
            gateway::GetUsersOnlineStatusResponse,
            gateway::OnlineBatchPushOneMsgRequest,
            gateway::OnlineBatchPushOneMsgResponse,
            gateway::KickUserOfflineRequest,
            gateway::KickUserOfflineResponse,
            gateway::MultiTerminalLoginCheckRequest,
            gateway::MultiTerminalLoginCheckResponse,
        )
    ),
    tags(
        (name = "Health", description = "Liveness and counters"),
        (name = "Gateway", description = "Presence, push fanout, kick and login checks"),
    )
)]
pub struct ApiDoc;
