//! Multi-terminal login conflict resolution.
//!
//! Order on attach: the new session goes in and every conflicting session
//! comes out in one bucket mutation under the user's lock. Evicted sessions
//! are told why and closed only after the lock is released. A failure to
//! close them is logged and never rolls back the new login.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::eviction::EvictionService;
use super::metrics::GatewayMetrics;
use super::platform::{Platform, PlatformClass};
use super::registry::ConnectionRegistry;
use super::session::{CloseReason, Session};

/// Mutual-exclusion table applied when a user logs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPolicy {
    /// Any number of sessions on any platform.
    AllowAll,
    /// PC sessions never conflict; all other classes share a single slot.
    PcAndOther,
    /// At most one session per platform.
    #[default]
    SameTerminalKick,
    /// At most one session per platform class.
    SameClassKick,
}

impl LoginPolicy {
    /// Whether a new login on `incoming` must evict an existing session on
    /// `existing`.
    pub fn conflicts(self, incoming: Platform, existing: Platform) -> bool {
        match self {
            LoginPolicy::AllowAll => false,
            LoginPolicy::PcAndOther => {
                incoming.class() != PlatformClass::Pc && existing.class() != PlatformClass::Pc
            }
            LoginPolicy::SameTerminalKick => incoming == existing,
            LoginPolicy::SameClassKick => incoming.class() == existing.class(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LoginPolicy::AllowAll => "allow_all",
            LoginPolicy::PcAndOther => "pc_and_other",
            LoginPolicy::SameTerminalKick => "same_terminal_kick",
            LoginPolicy::SameClassKick => "same_class_kick",
        }
    }
}

impl fmt::Display for LoginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginPolicy {
    type Err = String;

    /// Accepts the numeric code (1-4) or the snake_case name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "allow_all" => Ok(LoginPolicy::AllowAll),
            "2" | "pc_and_other" => Ok(LoginPolicy::PcAndOther),
            "3" | "same_terminal_kick" => Ok(LoginPolicy::SameTerminalKick),
            "4" | "same_class_kick" => Ok(LoginPolicy::SameClassKick),
            other => Err(format!("unknown login policy {other:?}")),
        }
    }
}

pub struct ConflictResolver {
    registry: Arc<ConnectionRegistry>,
    eviction: EvictionService,
    metrics: Arc<GatewayMetrics>,
    policy: LoginPolicy,
}

impl ConflictResolver {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        eviction: EvictionService,
        metrics: Arc<GatewayMetrics>,
        policy: LoginPolicy,
    ) -> Self {
        Self {
            registry,
            eviction,
            metrics,
            policy,
        }
    }

    pub fn policy(&self) -> LoginPolicy {
        self.policy
    }

    /// Register a freshly attached session, superseding conflicting ones.
    ///
    /// Returns the sessions that were evicted.
    pub async fn admit(&self, session: Arc<Session>) -> Vec<Arc<Session>> {
        let incoming = session.platform;
        let policy = self.policy;
        let evicted = self
            .registry
            .register_exclusive(session.clone(), |existing| policy.conflicts(incoming, existing.platform));

        self.supersede(&evicted, &session.user_id, incoming).await;
        evicted
    }

    /// Apply the policy to a login that is about to happen elsewhere:
    /// evict local sessions that would conflict with it.
    ///
    /// Returns the connection IDs that were evicted.
    pub async fn check_login(&self, user_id: &str, platform: Platform) -> Vec<String> {
        let policy = self.policy;
        let evicted = self
            .registry
            .take_matching(user_id, |existing| policy.conflicts(platform, existing.platform));

        self.supersede(&evicted, user_id, platform).await;
        evicted.iter().map(|s| s.conn_id.clone()).collect()
    }

    async fn supersede(&self, evicted: &[Arc<Session>], user_id: &str, incoming: Platform) {
        for old in evicted {
            self.metrics.session_superseded();
            match self.eviction.close(old, CloseReason::Superseded, None).await {
                Ok(()) => tracing::info!(
                    conn_id = %old.conn_id,
                    %user_id,
                    old_platform = %old.platform,
                    new_platform = %incoming,
                    policy = %self.policy,
                    "session superseded by new login"
                ),
                Err(e) => tracing::warn!(
                    error = %e,
                    %user_id,
                    "failed to close superseded session"
                ),
            }
        }
    }
}
