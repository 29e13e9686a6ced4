//! Connection hub: the in-memory registry of live sessions and the
//! operations built on it.

pub mod conflict;
pub mod error;
pub mod eviction;
pub mod fanout;
pub mod metrics;
pub mod platform;
pub mod presence;
pub mod registry;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::auth::Authorizer;

use conflict::{ConflictResolver, LoginPolicy};
use eviction::EvictionService;
use fanout::FanoutEngine;
use metrics::GatewayMetrics;
use platform::PushTerminals;
use presence::PresenceService;
use registry::ConnectionRegistry;
use session::{CloseReason, Session};

/// Tunables of the hub, derived from `Config`.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub push_terminals: PushTerminals,
    pub login_policy: LoginPolicy,
    pub push_timeout: Duration,
    pub kick_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            push_terminals: PushTerminals::default(),
            login_policy: LoginPolicy::default(),
            push_timeout: Duration::from_millis(5000),
            kick_timeout: Duration::from_millis(3000),
        }
    }
}

/// All hub services over one shared registry.
pub struct Hub {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceService,
    pub fanout: FanoutEngine,
    pub eviction: EvictionService,
    pub resolver: ConflictResolver,
    closing: AtomicBool,
}

impl Hub {
    pub fn new(settings: HubSettings, authorizer: Arc<dyn Authorizer>, metrics: Arc<GatewayMetrics>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let eviction = EvictionService::new(registry.clone(), metrics.clone(), settings.kick_timeout);

        Self {
            presence: PresenceService::new(registry.clone(), authorizer),
            fanout: FanoutEngine::new(
                registry.clone(),
                settings.push_terminals,
                metrics.clone(),
                settings.push_timeout,
            ),
            resolver: ConflictResolver::new(registry.clone(), eviction.clone(), metrics, settings.login_policy),
            eviction,
            registry,
            closing: AtomicBool::new(false),
        }
    }

    /// Admit a newly identified session. Conflicting sessions are superseded.
    ///
    /// Returns `false` when the hub is shutting down; the session is then
    /// closed instead of kept.
    pub async fn attach(&self, session: Arc<Session>) -> bool {
        let evicted = self.resolver.admit(session.clone()).await;

        // Pairs with the store in `shutdown`: either its drain sees this
        // session or this load sees the flag.
        if self.closing.load(Ordering::SeqCst) {
            self.registry.unregister(&session);
            if let Err(e) = session.close(CloseReason::Shutdown).await {
                tracing::debug!(conn_id = %session.conn_id, error = %e, "close on shutdown failed");
            }
            return false;
        }

        tracing::debug!(
            conn_id = %session.conn_id,
            user_id = %session.user_id,
            platform = %session.platform,
            policy = %self.resolver.policy(),
            superseded = evicted.len(),
            "session attached"
        );
        true
    }

    /// Remove a session on connection teardown. Safe to call more than once.
    pub fn detach(&self, session: &Session) -> bool {
        self.registry.unregister(session)
    }

    /// Refuse further attaches, then drain the registry and close every
    /// session.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let sessions = self.registry.drain();
        tracing::info!(sessions = sessions.len(), "closing all sessions");

        join_all(sessions.iter().map(|s| async move {
            if let Err(e) = s.close(CloseReason::Shutdown).await {
                tracing::debug!(conn_id = %s.conn_id, error = %e, "close on shutdown failed");
            }
        }))
        .await;
    }
}
