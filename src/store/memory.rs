//! In-memory store backend.
//!
//! Single-process implementation of every store trait behind one RwLock.
//! Used by the test suite and suitable for embedders that do not need
//! durability; the locking gives it the same atomicity guarantees the
//! Postgres backend gets from conditional SQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use super::{
    EventStore, PrincipalStore, RateLimitDecision, RateLimitStore, ResetTokenStore, StoreError,
    StoreResult, SessionRecordStore, TwoFactorStore,
};
use crate::auth::models::{
    FailedAttemptOutcome, PendingTwoFactor, Principal, PrincipalId, ResetTokenRecord,
    SecurityEvent, SecurityEventType, SessionId, SessionRecord,
};

#[derive(Default)]
struct Inner {
    principals: HashMap<PrincipalId, Principal>,
    sessions: HashMap<SessionId, SessionRecord>,
    events: Vec<SecurityEvent>,
    rate_attempts: HashMap<String, Vec<DateTime<Utc>>>,
    pending_two_factor: HashMap<PrincipalId, PendingTwoFactor>,
    reset_tokens: HashMap<String, ResetTokenRecord>,
}

/// In-memory implementation of all store traits.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every appended event, oldest first. Test helper.
    pub async fn events_snapshot(&self) -> Vec<SecurityEvent> {
        self.inner.read().await.events.clone()
    }

    /// Snapshot of one principal record. Test helper.
    pub async fn principal_snapshot(&self, id: PrincipalId) -> Option<Principal> {
        self.inner.read().await.principals.get(&id).cloned()
    }
}

/// Count attempts inside the trailing window, dropping expired ones.
///
/// Kept as a pure function so the window arithmetic is testable on its own.
pub(crate) fn prune_and_count(
    attempts: &mut Vec<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> u64 {
    let cutoff = now - window;
    attempts.retain(|at| *at > cutoff);
    attempts.len() as u64
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn get(&self, id: PrincipalId) -> StoreResult<Option<Principal>> {
        Ok(self.inner.read().await.principals.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        Ok(self
            .inner
            .read()
            .await
            .principals
            .values()
            .find(|p| p.email == email)
            .cloned())
    }

    async fn insert(&self, principal: &Principal) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.principals.contains_key(&principal.id) {
            return Err(StoreError::Conflict(format!(
                "principal {} already exists",
                principal.id
            )));
        }
        inner.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: PrincipalId,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<FailedAttemptOutcome> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;

        principal.failed_attempts += 1;
        let attempts = principal.failed_attempts;
        let locked_until = if attempts >= threshold {
            let until = now + lockout;
            principal.locked_until = Some(until);
            Some(until)
        } else {
            None
        };

        Ok(FailedAttemptOutcome {
            attempts,
            locked_until,
        })
    }

    async fn clear_failed_attempts(&self, id: PrincipalId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        principal.failed_attempts = 0;
        principal.locked_until = None;
        Ok(())
    }

    async fn set_password(
        &self,
        id: PrincipalId,
        password_hash: &str,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        principal.password_hash = password_hash.to_string();
        principal.password_changed_at = changed_at;
        Ok(())
    }

    async fn set_two_factor(
        &self,
        id: PrincipalId,
        enabled: bool,
        secret: Option<String>,
        backup_code_hashes: Option<Vec<String>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        principal.two_factor_enabled = enabled;
        principal.two_factor_secret = secret;
        principal.backup_code_hashes = backup_code_hashes.unwrap_or_default();
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        id: PrincipalId,
        code_hash: &str,
    ) -> StoreResult<Option<usize>> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;

        let position = principal
            .backup_code_hashes
            .iter()
            .position(|stored| bool::from(stored.as_bytes().ct_eq(code_hash.as_bytes())));

        match position {
            Some(index) => {
                principal.backup_code_hashes.remove(index);
                Ok(Some(principal.backup_code_hashes.len()))
            }
            None => Ok(None),
        }
    }

    async fn set_email_verified(&self, id: PrincipalId, verified: bool) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let principal = inner
            .principals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;
        principal.email_verified = verified;
        if verified && principal.status == crate::auth::models::PrincipalStatus::PendingVerification
        {
            principal.status = crate::auth::models::PrincipalStatus::Active;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStore for MemoryStore {
    async fn insert_with_cap(
        &self,
        session: &SessionRecord,
        max_active: usize,
    ) -> StoreResult<Vec<SessionId>> {
        // Overflow is derived under the same write lock as the insertion so
        // concurrent creates see each other's sessions; see trait contract.
        let mut inner = self.inner.write().await;

        let mut active: Vec<(SessionId, DateTime<Utc>)> = inner
            .sessions
            .values()
            .filter(|s| s.principal_id == session.principal_id && s.active)
            .map(|s| (s.id, s.last_activity_at))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1));

        let evicted: Vec<SessionId> = active
            .iter()
            .skip(max_active.saturating_sub(1))
            .map(|(id, _)| *id)
            .collect();
        for id in &evicted {
            if let Some(existing) = inner.sessions.get_mut(id) {
                existing.active = false;
            }
        }

        inner.sessions.insert(session.id, session.clone());
        Ok(evicted)
    }

    async fn get(&self, id: SessionId) -> StoreResult<Option<SessionRecord>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn active_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> StoreResult<Vec<SessionRecord>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.principal_id == principal_id && s.active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.last_activity_at = now;
        Ok(())
    }

    async fn mark_inactive(&self, id: SessionId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&id) {
            Some(session) if session.active => {
                session.active = false;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("session {id}"))),
        }
    }

    async fn mark_all_inactive(&self, principal_id: PrincipalId) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut affected = 0;
        for session in inner.sessions.values_mut() {
            if session.principal_id == principal_id && session.active {
                session.active = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn count_active(&self) -> StoreResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.active)
            .count() as u64)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, event: &SecurityEvent) -> StoreResult<()> {
        self.inner.write().await.events.push(event.clone());
        Ok(())
    }

    async fn recent_by_type(
        &self,
        principal_id: PrincipalId,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SecurityEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<SecurityEvent> = inner
            .events
            .iter()
            .filter(|e| {
                e.principal_id == Some(principal_id) && e.event_type == event_type && e.at >= since
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| b.at.cmp(&a.at));
        events.truncate(limit);
        Ok(events)
    }

    async fn count_by_type_since(
        &self,
        principal_id: Option<PrincipalId>,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| {
                e.event_type == event_type
                    && e.at >= since
                    && principal_id.is_none_or(|id| e.principal_id == Some(id))
            })
            .count() as u64)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision> {
        // Count and insert under one write lock; see trait contract.
        let mut inner = self.inner.write().await;
        let attempts = inner.rate_attempts.entry(key.to_string()).or_default();
        let current = prune_and_count(attempts, window, now);

        if current >= u64::from(limit) {
            let oldest = attempts.iter().min().copied().unwrap_or(now);
            let retry_after = (oldest + window) - now;
            return Ok(RateLimitDecision::Exhausted {
                retry_after: retry_after.max(Duration::zero()),
            });
        }

        attempts.push(now);
        Ok(RateLimitDecision::Allowed {
            remaining: limit - current as u32 - 1,
        })
    }

    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        match inner.rate_attempts.get_mut(key) {
            Some(attempts) => Ok(prune_and_count(attempts, window, now)),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TwoFactorStore for MemoryStore {
    async fn put_pending(&self, pending: &PendingTwoFactor) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .pending_two_factor
            .insert(pending.principal_id, pending.clone());
        Ok(())
    }

    async fn get_pending(
        &self,
        principal_id: PrincipalId,
    ) -> StoreResult<Option<PendingTwoFactor>> {
        Ok(self
            .inner
            .read()
            .await
            .pending_two_factor
            .get(&principal_id)
            .cloned())
    }

    async fn clear_pending(&self, principal_id: PrincipalId) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .pending_two_factor
            .remove(&principal_id);
        Ok(())
    }
}

#[async_trait]
impl ResetTokenStore for MemoryStore {
    async fn put(&self, record: &ResetTokenRecord) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .reset_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PrincipalId>> {
        let mut inner = self.inner.write().await;
        let matching_key = inner
            .reset_tokens
            .keys()
            .find(|stored| bool::from(stored.as_bytes().ct_eq(token_hash.as_bytes())))
            .cloned();

        let Some(key) = matching_key else {
            return Ok(None);
        };
        let record = inner
            .reset_tokens
            .get_mut(&key)
            .ok_or_else(|| StoreError::Internal("reset token vanished under lock".into()))?;

        if record.used || record.expires_at <= now {
            return Ok(None);
        }
        record.used = true;
        Ok(Some(record.principal_id))
    }
}
