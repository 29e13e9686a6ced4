//! Forced session termination ("kick").

use std::sync::Arc;
use std::time::Duration;

use super::error::HubError;
use super::metrics::GatewayMetrics;
use super::platform::Platform;
use super::registry::ConnectionRegistry;
use super::session::{CloseReason, Session};

#[derive(Clone)]
pub struct EvictionService {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<GatewayMetrics>,
    kick_timeout: Duration,
}

impl EvictionService {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<GatewayMetrics>, kick_timeout: Duration) -> Self {
        Self {
            registry,
            metrics,
            kick_timeout,
        }
    }

    /// Close every session of `user_id` on `platform`.
    ///
    /// No matching session is a successful no-op. Fail-fast: the first
    /// session that cannot be closed aborts the call and the remaining
    /// sessions of the set stay registered. `deadline` bounds each kick
    /// signal; `None` uses the configured kick timeout.
    pub async fn kick(&self, user_id: &str, platform: Platform, deadline: Option<Duration>) -> Result<(), HubError> {
        let Some((sessions, label)) = self.registry.lookup_platform(user_id, platform) else {
            tracing::debug!(%user_id, %platform, "kick: no sessions");
            return Ok(());
        };

        for session in sessions {
            if let Err(e) = self.close(&session, CloseReason::Kicked, deadline).await {
                // Lost a race with detach or supersede: nothing left to kick.
                if !self.registry.contains(&session) {
                    tracing::debug!(conn_id = %session.conn_id, %user_id, "kick: session already gone");
                    continue;
                }
                return Err(e);
            }
            self.registry.unregister(&session);
            self.metrics.session_kicked();
            tracing::info!(
                conn_id = %session.conn_id,
                %user_id,
                platform = label,
                "session kicked"
            );
        }
        Ok(())
    }

    /// Kick the same platform across several users, stopping at the first
    /// failure.
    pub async fn kick_users(
        &self,
        user_ids: &[String],
        platform: Platform,
        deadline: Option<Duration>,
    ) -> Result<(), HubError> {
        for user_id in user_ids {
            self.kick(user_id, platform, deadline).await?;
        }
        Ok(())
    }

    /// Signal and tear down one session that is already out of the registry
    /// (or about to be).
    pub async fn close(
        &self,
        session: &Session,
        reason: CloseReason,
        deadline: Option<Duration>,
    ) -> Result<(), HubError> {
        session
            .kick(reason, deadline.unwrap_or(self.kick_timeout))
            .await
            .map_err(|source| HubError::Eviction {
                conn_id: session.conn_id.clone(),
                user_id: session.user_id.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::error::TransportError;
    use crate::hub::session::mock::{session, session_with, MockTransport};

    fn service() -> (EvictionService, Arc<ConnectionRegistry>, Arc<GatewayMetrics>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let svc = EvictionService::new(registry.clone(), metrics.clone(), Duration::from_secs(1));
        (svc, registry, metrics)
    }

    #[tokio::test]
    async fn kicking_absent_pair_is_a_no_op() {
        let (svc, registry, _) = service();
        svc.kick("ghost", Platform::Web, None).await.unwrap();

        let (ios, t) = session("u1", Platform::Ios, false);
        registry.register(ios);
        svc.kick("u1", Platform::Web, None).await.unwrap();
        assert!(!t.was_kicked());
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn kick_closes_and_unregisters_matching_sessions() {
        let (svc, registry, metrics) = service();
        let (w1, t1) = session("u1", Platform::Web, false);
        let (w2, t2) = session("u1", Platform::Web, true);
        let (ios, t3) = session("u1", Platform::Ios, false);
        registry.register(w1);
        registry.register(w2);
        registry.register(ios);

        svc.kick("u1", Platform::Web, None).await.unwrap();

        assert!(t1.was_kicked());
        assert!(t2.was_kicked());
        assert_eq!(*t1.closed.lock(), Some(CloseReason::Kicked));
        assert!(!t3.was_kicked());
        assert!(registry.lookup_platform("u1", Platform::Web).is_none());
        assert_eq!(registry.session_count(), 1);
        assert_eq!(metrics.snapshot().kicks, 2);
    }

    #[tokio::test]
    async fn first_failure_stops_the_kick() {
        let (svc, registry, _) = service();
        let (first, _) = session_with("B", Platform::Web, false, MockTransport::failing());
        let (second, t2) = session("B", Platform::Web, false);
        registry.register(first.clone());
        registry.register(second.clone());

        let err = svc.kick("B", Platform::Web, None).await.unwrap_err();
        match err {
            HubError::Eviction { conn_id, source, .. } => {
                assert_eq!(conn_id, first.conn_id);
                assert_eq!(source, TransportError::Closed);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let (remaining, _) = registry.lookup_platform("B", Platform::Web).unwrap();
        assert!(remaining.iter().any(|s| s.conn_id == second.conn_id));
        assert!(!t2.was_kicked());
    }

    #[tokio::test]
    async fn kick_users_is_fail_fast_across_users() {
        let (svc, registry, _) = service();
        let (bad, _) = session_with("u1", Platform::Android, false, MockTransport::failing());
        let (later, t) = session("u2", Platform::Android, false);
        registry.register(bad);
        registry.register(later);

        let users = vec!["u1".to_string(), "u2".to_string()];
        assert!(svc.kick_users(&users, Platform::Android, None).await.is_err());
        assert!(!t.was_kicked());
        assert!(registry.lookup_all("u2").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_overrides_kick_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let svc = EvictionService::new(registry.clone(), metrics, Duration::from_secs(30));
        let (s, t) = session_with("u1", Platform::Web, false, MockTransport::slow(Duration::from_secs(10)));
        registry.register(s);

        let started = tokio::time::Instant::now();
        svc.kick("u1", Platform::Web, Some(Duration::from_millis(100)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*t.closed.lock(), Some(CloseReason::Kicked));
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_racing_detach_is_not_an_error() {
        let (svc, registry, metrics) = service();
        let transport = MockTransport {
            delay: Some(Duration::from_millis(100)),
            ..MockTransport::failing()
        };
        let (s, _) = session_with("u1", Platform::Web, false, transport);
        registry.register(s.clone());

        // The kick is parked in the signal write when the session detaches.
        let (kicked, detached) = tokio::join!(svc.kick("u1", Platform::Web, None), async {
            registry.unregister(&s)
        });

        assert!(detached);
        kicked.unwrap();
        assert_eq!(metrics.snapshot().kicks, 0);
    }
}
