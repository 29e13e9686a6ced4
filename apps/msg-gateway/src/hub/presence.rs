//! Point-in-time online status of users, for administrative callers.
//!
//! Presence is derived from the registry on every call; nothing is cached.
//! A registered session is online whether or not it is backgrounded:
//! background only affects push eligibility.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Authorizer, Operator};

use super::error::HubError;
use super::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
}

/// One session of a present user.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlatformStatus {
    pub platform: String,
    pub conn_id: String,
    pub is_background: bool,
    pub status: OnlineStatus,
}

/// Snapshot for one user that had at least one online session.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PresenceSnapshot {
    pub user_id: String,
    pub status: OnlineStatus,
    pub detail_platform_status: Vec<PlatformStatus>,
}

pub struct PresenceService {
    registry: Arc<ConnectionRegistry>,
    authorizer: Arc<dyn Authorizer>,
}

impl PresenceService {
    pub fn new(registry: Arc<ConnectionRegistry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    /// Online snapshot for each requested user, in request order.
    ///
    /// Users without sessions are omitted. Fails as a whole, with no data,
    /// unless the requester is an administrator.
    pub fn get_online_status(
        &self,
        requester: &Operator,
        user_ids: &[String],
    ) -> Result<Vec<PresenceSnapshot>, HubError> {
        if !self.authorizer.is_administrator(requester) {
            return Err(HubError::PermissionDenied("only app manager"));
        }

        let mut result = Vec::new();
        for user_id in user_ids {
            let Some(sessions) = self.registry.lookup_all(user_id) else {
                continue;
            };

            let detail: Vec<PlatformStatus> = sessions
                .iter()
                .map(|s| PlatformStatus {
                    platform: s.platform.label().to_string(),
                    conn_id: s.conn_id.clone(),
                    is_background: s.is_background(),
                    status: OnlineStatus::Online,
                })
                .collect();

            if !detail.is_empty() {
                result.push(PresenceSnapshot {
                    user_id: user_id.clone(),
                    status: OnlineStatus::Online,
                    detail_platform_status: detail,
                });
            }
        }

        tracing::debug!(
            operation_id = %requester.operation_id,
            requested = user_ids.len(),
            online = result.len(),
            "presence snapshot"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AppManagers;
    use crate::hub::platform::Platform;
    use crate::hub::session::mock::session;

    fn service() -> (PresenceService, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let authorizer = Arc::new(AppManagers::new(["admin".to_string()]));
        (PresenceService::new(registry.clone(), authorizer), registry)
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn users_without_sessions_are_omitted() {
        let (presence, registry) = service();
        let (s, _) = session("u1", Platform::Ios, false);
        registry.register(s);

        let result = presence
            .get_online_status(&Operator::new("admin"), &ids(&["ghost", "u1", "nobody"]))
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "u1");
    }

    #[test]
    fn empty_registry_returns_empty_result() {
        let (presence, _) = service();
        let result = presence
            .get_online_status(&Operator::new("admin"), &ids(&["a", "b"]))
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn non_admin_is_rejected_regardless_of_input() {
        let (presence, registry) = service();
        let (s, _) = session("u1", Platform::Ios, false);
        registry.register(s);

        for input in [ids(&[]), ids(&["u1"]), ids(&["ghost"])] {
            let err = presence
                .get_online_status(&Operator::new("u1"), &input)
                .unwrap_err();
            assert!(matches!(err, HubError::PermissionDenied(_)));
        }
    }

    #[test]
    fn backgrounded_sessions_are_still_online() {
        let (presence, registry) = service();
        let (ios, _) = session("u1", Platform::Ios, false);
        let (android, _) = session("u1", Platform::Android, true);
        registry.register(ios.clone());
        registry.register(android.clone());

        let result = presence
            .get_online_status(&Operator::new("admin"), &ids(&["u1"]))
            .unwrap();
        assert_eq!(result[0].status, OnlineStatus::Online);

        let detail = &result[0].detail_platform_status;
        assert_eq!(detail.len(), 2);
        assert_eq!(detail[0].platform, "IOS");
        assert_eq!(detail[0].conn_id, ios.conn_id);
        assert!(!detail[0].is_background);
        assert_eq!(detail[1].platform, "Android");
        assert!(detail[1].is_background);
    }

    #[test]
    fn detached_user_disappears() {
        let (presence, registry) = service();
        let (s, _) = session("u1", Platform::Web, false);
        registry.register(s.clone());
        registry.unregister(&s);

        let result = presence
            .get_online_status(&Operator::new("admin"), &ids(&["u1"]))
            .unwrap();
        assert!(result.is_empty());
    }
}
