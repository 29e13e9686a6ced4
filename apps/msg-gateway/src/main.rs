use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msg_gateway::config::Config;
use msg_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present; variables may also come from the environment.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        login_policy = %config.login_policy,
        max_conn_num = config.max_conn_num,
        push_terminals = ?config.push_terminals.platforms(),
        "msg-gateway configured"
    );

    let ws_addr = SocketAddr::from(([0, 0, 0, 0], config.ws_port));
    let rpc_addr = SocketAddr::from(([0, 0, 0, 0], config.rpc_port));
    let state = AppState::new(config);

    let ws_app = Router::new()
        .merge(msg_gateway::transport::server::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rpc_app = Router::new()
        .merge(msg_gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Refuse new sessions and close the live ones, then let both listeners stop.
    let (stop_tx, stop_rx) = watch::channel(false);
    let hub = state.hub.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested");
        hub.shutdown().await;
        let _ = stop_tx.send(true);
    });

    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .expect("failed to bind ws listener");
    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr)
        .await
        .expect("failed to bind rpc listener");
    tracing::info!(%ws_addr, %rpc_addr, "msg-gateway listening");

    let ws_server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(stopped(stop_rx.clone()));
    let rpc_server = axum::serve(rpc_listener, rpc_app).with_graceful_shutdown(stopped(stop_rx));

    tokio::try_join!(
        async { ws_server.await },
        async { rpc_server.await },
    )
    .expect("server error");

    tracing::info!("msg-gateway stopped");
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
