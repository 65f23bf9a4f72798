//! Session lifecycle management.
//!
//! Enforces the per-principal active-session cap at creation time and
//! gives invalidation an explicit resilience contract: an unretried
//! failure there would leave a session silently live after the user
//! believes they logged out.

use std::sync::Arc;

use super::retry::{with_retry, RetryPolicy};
use crate::auth::models::{DeviceInfo, PrincipalId, SessionId, SessionRecord};
use crate::clock::Clock;
use crate::store::{SessionRecordStore, StoreResult};

/// Session manager
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionRecordStore>,
    clock: Arc<dyn Clock>,
    max_sessions: usize,
    retry: RetryPolicy,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionRecordStore>,
        clock: Arc<dyn Clock>,
        max_sessions: usize,
    ) -> Self {
        Self {
            store,
            clock,
            max_sessions,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a session under a caller-chosen id (the token correlation id).
    ///
    /// Cap enforcement happens inside the store write: the least-recently-
    /// active sessions beyond `max_sessions - 1` are derived and marked
    /// inactive atomically with the insertion, so two concurrent creates
    /// cannot both pass a stale read of the active set.
    pub async fn create(
        &self,
        principal_id: PrincipalId,
        session_id: SessionId,
        device: DeviceInfo,
    ) -> StoreResult<SessionRecord> {
        let now = self.clock.now();
        let session = SessionRecord {
            id: session_id,
            principal_id,
            device,
            created_at: now,
            last_activity_at: now,
            active: true,
        };

        let evicted = self.store.insert_with_cap(&session, self.max_sessions).await?;
        if !evicted.is_empty() {
            log::info!(
                "evicted {} session(s) for principal {principal_id} at cap {}",
                evicted.len(),
                self.max_sessions
            );
        }
        Ok(session)
    }

    pub async fn get(&self, session_id: SessionId) -> StoreResult<Option<SessionRecord>> {
        self.store.get(session_id).await
    }

    /// Refresh last-activity; best-effort, failures are logged and dropped.
    pub async fn touch(&self, session_id: SessionId) {
        let now = self.clock.now();
        if let Err(err) = self.store.touch(session_id, now).await {
            log::warn!("failed to touch session {session_id}: {err}");
        }
    }

    /// Mark one session inactive, retrying on transient store failures.
    ///
    /// Returns whether the session was active beforehand.
    pub async fn invalidate(&self, session_id: SessionId) -> StoreResult<bool> {
        with_retry(self.retry, "session.invalidate", || {
            self.store.mark_inactive(session_id)
        })
        .await
    }

    /// Mark every active session for a principal inactive, with retry.
    pub async fn invalidate_all(&self, principal_id: PrincipalId) -> StoreResult<u64> {
        with_retry(self.retry, "session.invalidate_all", || {
            self.store.mark_all_inactive(principal_id)
        })
        .await
    }

    pub async fn count_active(&self) -> StoreResult<u64> {
        self.store.count_active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn device(ip: &str) -> DeviceInfo {
        DeviceInfo {
            ip: ip.to_string(),
            user_agent: "test-agent".to_string(),
            device_name: None,
        }
    }

    fn manager(max_sessions: usize) -> (SessionManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = SessionManager::new(store.clone(), clock.clone(), max_sessions);
        (manager, store, clock)
    }

    #[tokio::test]
    async fn test_cap_evicts_least_recently_active() {
        let (manager, store, clock) = manager(3);
        let principal_id = Uuid::new_v4();

        let mut ids = vec![];
        for i in 0..3 {
            let id = Uuid::new_v4();
            manager
                .create(principal_id, id, device(&format!("10.0.0.{i}")))
                .await
                .unwrap();
            ids.push(id);
            clock.advance(Duration::minutes(1));
        }

        // The first session is the least recently active; touching it makes
        // the second one the eviction candidate instead.
        manager.touch(ids[0]).await;
        clock.advance(Duration::minutes(1));

        let fourth = Uuid::new_v4();
        manager
            .create(principal_id, fourth, device("10.0.0.9"))
            .await
            .unwrap();

        let active = store.active_for_principal(principal_id).await.unwrap();
        assert_eq!(active.len(), 3);
        let active_ids: Vec<SessionId> = active.iter().map(|s| s.id).collect();
        assert!(active_ids.contains(&fourth));
        assert!(active_ids.contains(&ids[0]));
        assert!(!active_ids.contains(&ids[1]));
    }

    #[tokio::test]
    async fn test_exactly_cap_sessions_remain_active() {
        let (manager, store, clock) = manager(5);
        let principal_id = Uuid::new_v4();

        for _ in 0..6 {
            manager
                .create(principal_id, Uuid::new_v4(), device("10.0.0.1"))
                .await
                .unwrap();
            clock.advance(Duration::seconds(10));
        }

        let active = store.active_for_principal(principal_id).await.unwrap();
        assert_eq!(active.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_creates_respect_cap() {
        use tokio::task::JoinSet;

        let (manager, store, _clock) = manager(2);
        let principal_id = Uuid::new_v4();

        let mut join_set = JoinSet::new();
        for i in 0..10 {
            let manager = manager.clone();
            join_set.spawn(async move {
                manager
                    .create(principal_id, Uuid::new_v4(), device(&format!("10.0.0.{i}")))
                    .await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap().unwrap();
        }

        let active = store.active_for_principal(principal_id).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_reports_prior_state() {
        let (manager, _store, _clock) = manager(5);
        let principal_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        manager
            .create(principal_id, session_id, device("10.0.0.1"))
            .await
            .unwrap();

        assert!(manager.invalidate(session_id).await.unwrap());
        assert!(!manager.invalidate(session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_all_returns_count() {
        let (manager, _store, clock) = manager(5);
        let principal_id = Uuid::new_v4();
        for _ in 0..3 {
            manager
                .create(principal_id, Uuid::new_v4(), device("10.0.0.1"))
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        assert_eq!(manager.invalidate_all(principal_id).await.unwrap(), 3);
        assert_eq!(manager.invalidate_all(principal_id).await.unwrap(), 0);
    }
}
