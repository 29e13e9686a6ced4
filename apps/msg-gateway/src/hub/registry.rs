//! Registry of live sessions: user → platform → sessions.
//!
//! Uses `DashMap` for shard-level concurrency, so unrelated users never wait
//! on each other. Every mutation of one user's bucket happens under that
//! bucket's shard write lock, so readers never see a half-applied change.
//! No I/O happens under the lock; callers get `Arc<Session>` snapshots and
//! talk to the network after the guard is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::platform::Platform;
use super::session::Session;

/// One user's sessions grouped by platform, in attach order within a platform.
#[derive(Default)]
pub struct UserBucket {
    platforms: BTreeMap<Platform, Vec<Arc<Session>>>,
}

impl UserBucket {
    fn insert(&mut self, session: Arc<Session>) {
        self.platforms.entry(session.platform).or_default().push(session);
    }

    fn remove(&mut self, platform: Platform, conn_id: &str) -> Option<Arc<Session>> {
        let sessions = self.platforms.get_mut(&platform)?;
        let idx = sessions.iter().position(|s| s.conn_id == conn_id)?;
        let removed = sessions.remove(idx);
        if sessions.is_empty() {
            self.platforms.remove(&platform);
        }
        Some(removed)
    }

    /// Remove and return every session matching `pred`, in iteration order.
    fn take_matching(&mut self, pred: impl Fn(&Session) -> bool) -> Vec<Arc<Session>> {
        let mut taken = Vec::new();
        for sessions in self.platforms.values_mut() {
            let (matched, kept): (Vec<_>, Vec<_>) =
                sessions.drain(..).partition(|s: &Arc<Session>| pred(s.as_ref()));
            *sessions = kept;
            taken.extend(matched);
        }
        self.platforms.retain(|_, sessions| !sessions.is_empty());
        taken
    }

    fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Snapshot in registry iteration order: platform ID ascending, then
    /// attach order.
    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.platforms.values().flatten().cloned().collect()
    }

    fn len(&self) -> usize {
        self.platforms.values().map(Vec::len).sum()
    }
}

/// Concurrency-safe store of every live session on this node.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<String, UserBucket>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Insert a session into its (user, platform) bucket with no conflict
    /// check.
    #[cfg(test)]
    pub(crate) fn register(&self, session: Arc<Session>) {
        self.users
            .entry(session.user_id.clone())
            .or_default()
            .insert(session);
    }

    /// Insert a session and, in the same bucket mutation, remove every
    /// existing session of that user for which `conflicts` holds.
    ///
    /// Returns the removed sessions in iteration order. The caller owns
    /// closing them.
    pub fn register_exclusive(
        &self,
        session: Arc<Session>,
        conflicts: impl Fn(&Session) -> bool,
    ) -> Vec<Arc<Session>> {
        let mut bucket = self.users.entry(session.user_id.clone()).or_default();
        let evicted = bucket.take_matching(conflicts);
        bucket.insert(session);
        evicted
    }

    /// Remove a session from its bucket. Idempotent: returns `false` when the
    /// session (or the whole bucket) is already gone.
    pub fn unregister(&self, session: &Session) -> bool {
        let mut removed = false;
        self.users.remove_if_mut(&session.user_id, |_, bucket| {
            removed = bucket.remove(session.platform, &session.conn_id).is_some();
            bucket.is_empty()
        });
        removed
    }

    /// Whether this exact session is still registered.
    pub fn contains(&self, session: &Session) -> bool {
        self.users.get(&session.user_id).is_some_and(|bucket| {
            bucket
                .platforms
                .get(&session.platform)
                .is_some_and(|sessions| sessions.iter().any(|s| s.conn_id == session.conn_id))
        })
    }

    /// Remove and return a user's sessions matching `pred`.
    pub fn take_matching(&self, user_id: &str, pred: impl Fn(&Session) -> bool) -> Vec<Arc<Session>> {
        let mut taken = Vec::new();
        self.users.remove_if_mut(user_id, |_, bucket| {
            taken = bucket.take_matching(&pred);
            bucket.is_empty()
        });
        taken
    }

    /// All sessions of a user across platforms; `None` when there are none.
    pub fn lookup_all(&self, user_id: &str) -> Option<Vec<Arc<Session>>> {
        let bucket = self.users.get(user_id)?;
        let sessions = bucket.snapshot();
        (!sessions.is_empty()).then_some(sessions)
    }

    /// Sessions of a user on one platform, with the platform label.
    pub fn lookup_platform(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Option<(Vec<Arc<Session>>, &'static str)> {
        let bucket = self.users.get(user_id)?;
        let sessions = bucket.platforms.get(&platform)?;
        (!sessions.is_empty()).then(|| (sessions.clone(), platform.label()))
    }

    /// Empty the registry, returning everything that was in it.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let user_ids: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        user_ids
            .into_iter()
            .filter_map(|uid| self.users.remove(&uid))
            .flat_map(|(_, bucket)| bucket.snapshot())
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn session_count(&self) -> usize {
        self.users.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::session::mock::session;

    #[test]
    fn register_and_lookup_all() {
        let registry = ConnectionRegistry::new();
        let (a, _) = session("u1", Platform::Android, false);
        let (b, _) = session("u1", Platform::Ios, true);
        registry.register(a.clone());
        registry.register(b.clone());

        let sessions = registry.lookup_all("u1").unwrap();
        // Iteration order follows platform ID, not insertion.
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].conn_id, b.conn_id);
        assert_eq!(sessions[1].conn_id, a.conn_id);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn lookup_unknown_user_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup_all("ghost").is_none());
        assert!(registry.lookup_platform("ghost", Platform::Web).is_none());
    }

    #[test]
    fn lookup_platform_returns_label_and_attach_order() {
        let registry = ConnectionRegistry::new();
        let (w1, _) = session("u1", Platform::Web, false);
        let (w2, _) = session("u1", Platform::Web, false);
        let (ios, _) = session("u1", Platform::Ios, false);
        registry.register(w1.clone());
        registry.register(ios);
        registry.register(w2.clone());

        let (sessions, label) = registry.lookup_platform("u1", Platform::Web).unwrap();
        assert_eq!(label, "Web");
        let ids: Vec<&str> = sessions.iter().map(|s| s.conn_id.as_str()).collect();
        assert_eq!(ids, vec![w1.conn_id.as_str(), w2.conn_id.as_str()]);
        assert!(registry.lookup_platform("u1", Platform::Linux).is_none());
    }

    #[test]
    fn unregister_is_idempotent_and_drops_empty_buckets() {
        let registry = ConnectionRegistry::new();
        let (s, _) = session("u1", Platform::Ios, false);
        registry.register(s.clone());

        assert!(registry.contains(&s));
        assert!(registry.unregister(&s));
        assert!(!registry.contains(&s));
        assert!(!registry.unregister(&s));
        assert!(registry.lookup_all("u1").is_none());
        assert_eq!(registry.user_count(), 0);

        // Never-registered session is a no-op too.
        let (other, _) = session("u2", Platform::Web, false);
        assert!(!registry.unregister(&other));
    }

    #[test]
    fn unregister_leaves_other_platforms() {
        let registry = ConnectionRegistry::new();
        let (ios, _) = session("u1", Platform::Ios, false);
        let (web, _) = session("u1", Platform::Web, false);
        registry.register(ios.clone());
        registry.register(web.clone());

        registry.unregister(&ios);
        let remaining = registry.lookup_all("u1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].conn_id, web.conn_id);
    }

    #[test]
    fn register_exclusive_swaps_atomically() {
        let registry = ConnectionRegistry::new();
        let (old_ios, _) = session("u1", Platform::Ios, false);
        let (web, _) = session("u1", Platform::Web, false);
        registry.register(old_ios.clone());
        registry.register(web.clone());

        let (new_ios, _) = session("u1", Platform::Ios, false);
        let evicted = registry.register_exclusive(new_ios.clone(), |s| s.platform == Platform::Ios);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].conn_id, old_ios.conn_id);
        let (sessions, _) = registry.lookup_platform("u1", Platform::Ios).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].conn_id, new_ios.conn_id);
        assert_eq!(registry.session_count(), 2);

        // The evicted session's own detach later is a no-op.
        assert!(!registry.unregister(&old_ios));
    }

    #[test]
    fn take_matching_removes_bucket_when_emptied() {
        let registry = ConnectionRegistry::new();
        let (a, _) = session("u1", Platform::Android, false);
        registry.register(a.clone());

        let taken = registry.take_matching("u1", |_| true);
        assert_eq!(taken.len(), 1);
        assert_eq!(registry.user_count(), 0);
        assert!(registry.take_matching("u1", |_| true).is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        for uid in ["u1", "u2", "u3"] {
            let (s, _) = session(uid, Platform::Linux, false);
            registry.register(s);
        }
        assert_eq!(registry.drain().len(), 3);
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_counts_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("u{}", worker % 4);
                let mut kept = Vec::new();
                for i in 0..200 {
                    let (s, _) = session(&user, Platform::ALL[i % Platform::ALL.len()], false);
                    registry.register(s.clone());
                    if i % 2 == 0 {
                        assert!(registry.unregister(&s));
                    } else {
                        kept.push(s);
                    }
                    let _ = registry.lookup_all(&user);
                }
                kept.len()
            }));
        }

        let mut expected = 0;
        for h in handles {
            expected += h.await.unwrap();
        }
        assert_eq!(registry.session_count(), expected);
        assert_eq!(registry.user_count(), 4);
    }
}
