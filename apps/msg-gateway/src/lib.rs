pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod routes;
pub mod transport;

use std::sync::Arc;

use tokio::sync::Semaphore;

use auth::{AppManagers, TokenVerifier, TrustUpstream};
use config::Config;
use hub::metrics::GatewayMetrics;
use hub::Hub;
use transport::handler::{InboundHandler, RejectAll};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<GatewayMetrics>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub inbound: Arc<dyn InboundHandler>,
    /// One permit per open websocket connection.
    pub slots: Arc<Semaphore>,
}

impl AppState {
    /// Build the hub and its collaborators from configuration, with the
    /// permissive token verifier and no inbound request handler.
    pub fn new(config: Config) -> Self {
        let metrics = Arc::new(GatewayMetrics::new());
        let authorizer = Arc::new(AppManagers::new(config.app_manager_user_ids.iter().cloned()));
        let hub = Hub::new(config.hub_settings(), authorizer, metrics.clone());

        Self {
            slots: Arc::new(Semaphore::new(config.max_conn_num)),
            config: Arc::new(config),
            hub: Arc::new(hub),
            metrics,
            verifier: Arc::new(TrustUpstream),
            inbound: Arc::new(RejectAll),
        }
    }

    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_inbound_handler(mut self, inbound: Arc<dyn InboundHandler>) -> Self {
        self.inbound = inbound;
        self
    }

    /// Websocket connections currently holding a slot.
    pub fn open_connections(&self) -> usize {
        self.config
            .max_conn_num
            .saturating_sub(self.slots.available_permits())
    }
}
