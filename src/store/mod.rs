//! Store seam: trait-based abstractions over the external principal store.
//!
//! Mirrors the repository pattern used elsewhere in the stack: each concern
//! gets a narrow async trait, concrete backends implement all of them, and
//! managers receive trait objects so tests can swap in [`MemoryStore`].
//!
//! Backends map their native failures onto the closed [`StoreError`]
//! category set; retry decisions are made only through
//! [`StoreError::is_retryable`].

pub mod errors;
pub mod memory;
pub mod postgres;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::{DatabaseConfig, PgStore};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::auth::models::{
    FailedAttemptOutcome, PendingTwoFactor, Principal, PrincipalId, ResetTokenRecord,
    SecurityEvent, SecurityEventType, SessionId, SessionRecord,
};

/// Principal record persistence.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get(&self, id: PrincipalId) -> StoreResult<Option<Principal>>;

    /// Lookup by email; callers lowercase before querying.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>>;

    async fn insert(&self, principal: &Principal) -> StoreResult<()>;

    /// Atomically increment the failed-attempt counter and, when the new
    /// count reaches `threshold`, set `locked_until = now + lockout` in the
    /// same conditional write. Concurrent failures must not under-count.
    async fn record_failed_attempt(
        &self,
        id: PrincipalId,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<FailedAttemptOutcome>;

    /// Reset the failed-attempt counter and clear any lockout.
    async fn clear_failed_attempts(&self, id: PrincipalId) -> StoreResult<()>;

    async fn set_password(
        &self,
        id: PrincipalId,
        password_hash: &str,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Commit or clear 2FA material on the principal.
    async fn set_two_factor(
        &self,
        id: PrincipalId,
        enabled: bool,
        secret: Option<String>,
        backup_code_hashes: Option<Vec<String>>,
    ) -> StoreResult<()>;

    /// Remove a backup-code digest if present, returning the remaining
    /// count. `None` means the digest did not match any stored code.
    async fn consume_backup_code(
        &self,
        id: PrincipalId,
        code_hash: &str,
    ) -> StoreResult<Option<usize>>;

    async fn set_email_verified(&self, id: PrincipalId, verified: bool) -> StoreResult<()>;
}

/// Session record persistence.
#[async_trait]
pub trait SessionRecordStore: Send + Sync {
    /// Insert a session, keeping at most `max_active` active sessions for
    /// its principal: the least-recently-active sessions beyond
    /// `max_active - 1` are marked inactive in the same atomic write as the
    /// insertion, so concurrent logins cannot both bypass the cap. Returns
    /// the evicted session ids.
    async fn insert_with_cap(
        &self,
        session: &SessionRecord,
        max_active: usize,
    ) -> StoreResult<Vec<SessionId>>;

    async fn get(&self, id: SessionId) -> StoreResult<Option<SessionRecord>>;

    /// Active sessions for a principal, most recently active first.
    async fn active_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> StoreResult<Vec<SessionRecord>>;

    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> StoreResult<()>;

    /// Mark a session inactive; returns whether it was active before.
    async fn mark_inactive(&self, id: SessionId) -> StoreResult<bool>;

    /// Mark every active session for the principal inactive in one
    /// conditional batch; returns the number affected.
    async fn mark_all_inactive(&self, principal_id: PrincipalId) -> StoreResult<u64>;

    async fn count_active(&self) -> StoreResult<u64>;
}

/// Append-only security event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> StoreResult<()>;

    /// Most recent events of one type for a principal since `since`,
    /// newest first, at most `limit`.
    async fn recent_by_type(
        &self,
        principal_id: PrincipalId,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SecurityEvent>>;

    /// Count events of one type since `since`, optionally scoped to a
    /// principal.
    async fn count_by_type_since(
        &self,
        principal_id: Option<PrincipalId>,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

/// Outcome of a rate-limit acquisition.
#[derive(Debug, Clone, Copy)]
pub enum RateLimitDecision {
    /// Attempt recorded; `remaining` may be taken before this one expires.
    Allowed { remaining: u32 },
    /// Limit reached; nothing recorded.
    Exhausted { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitDecision::Exhausted { retry_after } => Some(*retry_after),
            RateLimitDecision::Allowed { .. } => None,
        }
    }
}

/// Sliding-window attempt counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count attempts for `key` newer than `now - window`; if below
    /// `limit`, record this attempt and allow. Counting and insertion must
    /// not be separated by a race that lets concurrent callers exceed the
    /// limit by more than one attempt.
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision>;

    /// Attempts currently inside the window, without recording one.
    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

/// Pending (unconfirmed) 2FA setup material.
#[async_trait]
pub trait TwoFactorStore: Send + Sync {
    async fn put_pending(&self, pending: &PendingTwoFactor) -> StoreResult<()>;

    async fn get_pending(&self, principal_id: PrincipalId) -> StoreResult<Option<PendingTwoFactor>>;

    async fn clear_pending(&self, principal_id: PrincipalId) -> StoreResult<()>;
}

/// Password reset token persistence.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    async fn put(&self, record: &ResetTokenRecord) -> StoreResult<()>;

    /// Atomically redeem a token by digest: returns the owning principal
    /// and marks it used, or `None` when absent, expired or already used.
    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PrincipalId>>;
}

/// Bundle of store handles injected into [`AuthManager`](crate::auth::AuthManager).
#[derive(Clone)]
pub struct StoreHandles {
    pub principals: Arc<dyn PrincipalStore>,
    pub sessions: Arc<dyn SessionRecordStore>,
    pub events: Arc<dyn EventStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub two_factor: Arc<dyn TwoFactorStore>,
    pub reset_tokens: Arc<dyn ResetTokenStore>,
}

impl StoreHandles {
    /// Build all handles from one backend implementing every trait.
    pub fn from_single<S>(store: Arc<S>) -> Self
    where
        S: PrincipalStore
            + SessionRecordStore
            + EventStore
            + RateLimitStore
            + TwoFactorStore
            + ResetTokenStore
            + 'static,
    {
        Self {
            principals: store.clone(),
            sessions: store.clone(),
            events: store.clone(),
            rate_limits: store.clone(),
            two_factor: store.clone(),
            reset_tokens: store,
        }
    }
}
