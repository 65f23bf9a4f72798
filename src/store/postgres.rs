//! PostgreSQL store backend.
//!
//! Implements every store trait over sqlx. Counter increments, session-cap
//! eviction and token redemption are expressed as conditional single
//! statements (or one transaction) so concurrent callers cannot under-count
//! or double-spend.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;

use super::{
    EventStore, PrincipalStore, RateLimitDecision, RateLimitStore, ResetTokenStore, StoreError,
    StoreResult, SessionRecordStore, TwoFactorStore,
};
use crate::auth::models::{
    DeviceInfo, FailedAttemptOutcome, PendingTwoFactor, Principal, PrincipalId, ResetTokenRecord,
    SecurityEvent, SecurityEventType, SessionId, SessionRecord,
};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/gatekeeper".to_string(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// PostgreSQL implementation of all store traits.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect a pool using the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(std::time::Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the backing tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS principals (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                failed_attempts INT NOT NULL DEFAULT 0,
                locked_until TIMESTAMPTZ,
                email_verified BOOLEAN NOT NULL DEFAULT FALSE,
                two_factor_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                two_factor_secret TEXT,
                backup_code_hashes TEXT[] NOT NULL DEFAULT '{}',
                password_changed_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id UUID PRIMARY KEY,
                principal_id UUID NOT NULL,
                ip TEXT NOT NULL,
                user_agent TEXT NOT NULL,
                device_name TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                last_activity_at TIMESTAMPTZ NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_principal_active
             ON sessions (principal_id, active, last_activity_at DESC)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id UUID PRIMARY KEY,
                event_type TEXT NOT NULL,
                principal_id UUID,
                ip TEXT,
                user_agent TEXT,
                risk TEXT NOT NULL,
                detail TEXT NOT NULL,
                at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_principal_type_at
             ON security_events (principal_id, event_type, at DESC)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_attempts (
                key TEXT NOT NULL,
                attempted_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rate_limit_key_at
             ON rate_limit_attempts (key, attempted_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_two_factor (
                principal_id UUID PRIMARY KEY,
                secret TEXT NOT NULL,
                backup_code_hashes TEXT[] NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reset_tokens (
                token_hash TEXT PRIMARY KEY,
                principal_id UUID NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                used BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

fn principal_from_row(row: &PgRow) -> StoreResult<Principal> {
    let role: String = row.get("role");
    let status: String = row.get("status");
    let failed_attempts: i32 = row.get("failed_attempts");

    Ok(Principal {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: role.parse().map_err(StoreError::Internal)?,
        status: status.parse().map_err(StoreError::Internal)?,
        failed_attempts: failed_attempts.max(0) as u32,
        locked_until: row.get("locked_until"),
        email_verified: row.get("email_verified"),
        two_factor_enabled: row.get("two_factor_enabled"),
        two_factor_secret: row.get("two_factor_secret"),
        backup_code_hashes: row.get("backup_code_hashes"),
        password_changed_at: row.get("password_changed_at"),
        created_at: row.get("created_at"),
    })
}

fn session_from_row(row: &PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        principal_id: row.get("principal_id"),
        device: DeviceInfo {
            ip: row.get("ip"),
            user_agent: row.get("user_agent"),
            device_name: row.get("device_name"),
        },
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
        active: row.get("active"),
    }
}

fn event_from_row(row: &PgRow) -> StoreResult<SecurityEvent> {
    let event_type: String = row.get("event_type");
    let risk: String = row.get("risk");
    let detail: String = row.get("detail");

    Ok(SecurityEvent {
        id: row.get("id"),
        event_type: serde_json::from_value(serde_json::Value::String(event_type))
            .map_err(|e| StoreError::Internal(e.to_string()))?,
        principal_id: row.get("principal_id"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
        risk: serde_json::from_value(serde_json::Value::String(risk))
            .map_err(|e| StoreError::Internal(e.to_string()))?,
        detail: serde_json::from_str(&detail).map_err(|e| StoreError::Internal(e.to_string()))?,
        at: row.get("at"),
    })
}

fn event_type_str(event_type: SecurityEventType) -> String {
    event_type.to_string()
}

#[async_trait]
impl PrincipalStore for PgStore {
    async fn get(&self, id: PrincipalId) -> StoreResult<Option<Principal>> {
        let row = sqlx::query("SELECT * FROM principals WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        let row = sqlx::query("SELECT * FROM principals WHERE email = $1")
            .bind(email)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn insert(&self, principal: &Principal) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO principals
                (id, email, password_hash, role, status, failed_attempts, locked_until,
                 email_verified, two_factor_enabled, two_factor_secret, backup_code_hashes,
                 password_changed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(principal.id)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.role.to_string())
        .bind(principal.status.to_string())
        .bind(principal.failed_attempts as i32)
        .bind(principal.locked_until)
        .bind(principal.email_verified)
        .bind(principal.two_factor_enabled)
        .bind(&principal.two_factor_secret)
        .bind(&principal.backup_code_hashes)
        .bind(principal.password_changed_at)
        .bind(principal.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: PrincipalId,
        threshold: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<FailedAttemptOutcome> {
        // Increment and conditional lockout in one statement.
        let row = sqlx::query(
            r#"
            UPDATE principals
            SET failed_attempts = failed_attempts + 1,
                locked_until = CASE
                    WHEN failed_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END
            WHERE id = $1
            RETURNING failed_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(threshold as i32)
        .bind(now + lockout)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("principal {id}")))?;

        let attempts: i32 = row.get("failed_attempts");
        let attempts = attempts.max(0) as u32;
        let locked_until = if attempts >= threshold {
            row.get("locked_until")
        } else {
            None
        };

        Ok(FailedAttemptOutcome {
            attempts,
            locked_until,
        })
    }

    async fn clear_failed_attempts(&self, id: PrincipalId) -> StoreResult<()> {
        sqlx::query(
            "UPDATE principals SET failed_attempts = 0, locked_until = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn set_password(
        &self,
        id: PrincipalId,
        password_hash: &str,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE principals SET password_hash = $2, password_changed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn set_two_factor(
        &self,
        id: PrincipalId,
        enabled: bool,
        secret: Option<String>,
        backup_code_hashes: Option<Vec<String>>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE principals
            SET two_factor_enabled = $2, two_factor_secret = $3, backup_code_hashes = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(enabled)
        .bind(secret)
        .bind(backup_code_hashes.unwrap_or_default())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        id: PrincipalId,
        code_hash: &str,
    ) -> StoreResult<Option<usize>> {
        // Conditional removal; loses cleanly if the code was already spent.
        let row = sqlx::query(
            r#"
            UPDATE principals
            SET backup_code_hashes = array_remove(backup_code_hashes, $2)
            WHERE id = $1 AND $2 = ANY(backup_code_hashes)
            RETURNING cardinality(backup_code_hashes) AS remaining
            "#,
        )
        .bind(id)
        .bind(code_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|r| {
            let remaining: i32 = r.get("remaining");
            remaining.max(0) as usize
        }))
    }

    async fn set_email_verified(&self, id: PrincipalId, verified: bool) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE principals
            SET email_verified = $2,
                status = CASE
                    WHEN $2 AND status = 'pending_verification' THEN 'active'
                    ELSE status
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(verified)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStore for PgStore {
    async fn insert_with_cap(
        &self,
        session: &SessionRecord,
        max_active: usize,
    ) -> StoreResult<Vec<SessionId>> {
        let mut tx = self.pool.begin().await?;

        // Serialize creation per principal so concurrent transactions see
        // each other's inserts when deriving the overflow.
        sqlx::query("SELECT id FROM principals WHERE id = $1 FOR UPDATE")
            .bind(session.principal_id)
            .execute(&mut *tx)
            .await?;

        let evicted_rows = sqlx::query(
            r#"
            UPDATE sessions SET active = FALSE
            WHERE id IN (
                SELECT id FROM sessions
                WHERE principal_id = $1 AND active
                ORDER BY last_activity_at DESC
                OFFSET $2
            )
            RETURNING id
            "#,
        )
        .bind(session.principal_id)
        .bind(max_active.saturating_sub(1) as i64)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, principal_id, ip, user_agent, device_name, created_at, last_activity_at, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(session.principal_id)
        .bind(&session.device.ip)
        .bind(&session.device.user_agent)
        .bind(&session.device.device_name)
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .bind(session.active)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(evicted_rows.iter().map(|r| r.get("id")).collect())
    }

    async fn get(&self, id: SessionId) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn active_for_principal(
        &self,
        principal_id: PrincipalId,
    ) -> StoreResult<Vec<SessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sessions
            WHERE principal_id = $1 AND active
            ORDER BY last_activity_at DESC
            "#,
        )
        .bind(principal_id)
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn touch(&self, id: SessionId, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET last_activity_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn mark_inactive(&self, id: SessionId) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE sessions SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_inactive(&self, principal_id: PrincipalId) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE sessions SET active = FALSE WHERE principal_id = $1 AND active")
                .bind(principal_id)
                .execute(self.pool.as_ref())
                .await?;
        Ok(result.rows_affected())
    }

    async fn count_active(&self) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sessions WHERE active")
            .fetch_one(self.pool.as_ref())
            .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn append(&self, event: &SecurityEvent) -> StoreResult<()> {
        let detail = serde_json::to_string(&event.detail)
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO security_events
                (id, event_type, principal_id, ip, user_agent, risk, detail, at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event_type_str(event.event_type))
        .bind(event.principal_id)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.risk.to_string())
        .bind(detail)
        .bind(event.at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn recent_by_type(
        &self,
        principal_id: PrincipalId,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SecurityEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM security_events
            WHERE principal_id = $1 AND event_type = $2 AND at >= $3
            ORDER BY at DESC
            LIMIT $4
            "#,
        )
        .bind(principal_id)
        .bind(event_type_str(event_type))
        .bind(since)
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn count_by_type_since(
        &self,
        principal_id: Option<PrincipalId>,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM security_events
            WHERE event_type = $1 AND at >= $2
              AND ($3::uuid IS NULL OR principal_id = $3)
            "#,
        )
        .bind(event_type_str(event_type))
        .bind(since)
        .bind(principal_id)
        .fetch_one(self.pool.as_ref())
        .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl RateLimitStore for PgStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitDecision> {
        let cutoff = now - window;

        // Lazy cleanup of expired attempts for this key.
        sqlx::query("DELETE FROM rate_limit_attempts WHERE key = $1 AND attempted_at <= $2")
            .bind(key)
            .bind(cutoff)
            .execute(self.pool.as_ref())
            .await?;

        // Guarded insert: count and insert in one statement. Two concurrent
        // callers can overshoot by at most one attempt, which the contract
        // permits.
        let result = sqlx::query(
            r#"
            INSERT INTO rate_limit_attempts (key, attempted_at)
            SELECT $1, $3
            WHERE (
                SELECT COUNT(*) FROM rate_limit_attempts
                WHERE key = $1 AND attempted_at > $2
            ) < $4
            "#,
        )
        .bind(key)
        .bind(cutoff)
        .bind(now)
        .bind(limit as i64)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query(
                "SELECT MIN(attempted_at) AS oldest FROM rate_limit_attempts
                 WHERE key = $1 AND attempted_at > $2",
            )
            .bind(key)
            .bind(cutoff)
            .fetch_one(self.pool.as_ref())
            .await?;
            let oldest: Option<DateTime<Utc>> = row.get("oldest");
            let retry_after = oldest
                .map(|at| (at + window) - now)
                .unwrap_or_else(Duration::zero);
            return Ok(RateLimitDecision::Exhausted {
                retry_after: retry_after.max(Duration::zero()),
            });
        }

        let used = self.count_in_window(key, window, now).await?;
        Ok(RateLimitDecision::Allowed {
            remaining: limit.saturating_sub(used as u32),
        })
    }

    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM rate_limit_attempts WHERE key = $1 AND attempted_at > $2",
        )
        .bind(key)
        .bind(now - window)
        .fetch_one(self.pool.as_ref())
        .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl TwoFactorStore for PgStore {
    async fn put_pending(&self, pending: &PendingTwoFactor) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_two_factor (principal_id, secret, backup_code_hashes, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal_id)
            DO UPDATE SET
                secret = EXCLUDED.secret,
                backup_code_hashes = EXCLUDED.backup_code_hashes,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(pending.principal_id)
        .bind(&pending.secret)
        .bind(&pending.backup_code_hashes)
        .bind(pending.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn get_pending(
        &self,
        principal_id: PrincipalId,
    ) -> StoreResult<Option<PendingTwoFactor>> {
        let row = sqlx::query("SELECT * FROM pending_two_factor WHERE principal_id = $1")
            .bind(principal_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.map(|r| PendingTwoFactor {
            principal_id: r.get("principal_id"),
            secret: r.get("secret"),
            backup_code_hashes: r.get("backup_code_hashes"),
            created_at: r.get("created_at"),
        }))
    }

    async fn clear_pending(&self, principal_id: PrincipalId) -> StoreResult<()> {
        sqlx::query("DELETE FROM pending_two_factor WHERE principal_id = $1")
            .bind(principal_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResetTokenStore for PgStore {
    async fn put(&self, record: &ResetTokenRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reset_tokens (token_hash, principal_id, expires_at, used, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.principal_id)
        .bind(record.expires_at)
        .bind(record.used)
        .bind(record.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PrincipalId>> {
        let row = sqlx::query(
            r#"
            UPDATE reset_tokens
            SET used = TRUE
            WHERE token_hash = $1 AND NOT used AND expires_at > $2
            RETURNING principal_id
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(|r| r.get("principal_id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{PrincipalStatus, Role};
    use uuid::Uuid;

    async fn setup_store() -> PgStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://postgres@localhost/gatekeeper_test".to_string());
        let store = PgStore::connect(&DatabaseConfig {
            database_url,
            max_connections: 5,
            ..DatabaseConfig::default()
        })
        .await
        .expect("Failed to connect to test database");
        store.ensure_schema().await.expect("Failed to create schema");
        store
    }

    fn test_principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: format!("pg-{}@example.com", Uuid::new_v4()),
            password_hash: "$argon2id$fake".to_string(),
            role: Role::Member,
            status: PrincipalStatus::Active,
            failed_attempts: 0,
            locked_until: None,
            email_verified: true,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_code_hashes: vec![],
            password_changed_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_principal_round_trip() {
        let store = setup_store().await;
        let principal = test_principal();
        store.insert(&principal).await.unwrap();

        let loaded = PrincipalStore::get(&store, principal.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.email, principal.email);
        assert_eq!(loaded.role, Role::Member);
        assert_eq!(loaded.status, PrincipalStatus::Active);
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_failed_attempt_increment_locks() {
        let store = setup_store().await;
        let principal = test_principal();
        store.insert(&principal).await.unwrap();

        let now = Utc::now();
        for _ in 0..2 {
            store
                .record_failed_attempt(principal.id, 3, Duration::minutes(15), now)
                .await
                .unwrap();
        }
        let outcome = store
            .record_failed_attempt(principal.id, 3, Duration::minutes(15), now)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.locked_until.is_some());
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_insert_with_cap_limits_active_sessions() {
        let store = setup_store().await;
        let principal = test_principal();
        store.insert(&principal).await.unwrap();

        let base = Utc::now();
        for i in 0..3 {
            let session = SessionRecord {
                id: Uuid::new_v4(),
                principal_id: principal.id,
                device: DeviceInfo {
                    ip: "127.0.0.1".to_string(),
                    user_agent: "test".to_string(),
                    device_name: None,
                },
                created_at: base + Duration::seconds(i),
                last_activity_at: base + Duration::seconds(i),
                active: true,
            };
            store.insert_with_cap(&session, 2).await.unwrap();
        }

        let active = store.active_for_principal(principal.id).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_rate_limit_guarded_insert() {
        let store = setup_store().await;
        let key = format!("login:{}", Uuid::new_v4());
        let now = Utc::now();

        for _ in 0..3 {
            let decision = store
                .try_acquire(&key, 3, Duration::seconds(60), now)
                .await
                .unwrap();
            assert!(decision.is_allowed());
        }
        let decision = store
            .try_acquire(&key, 3, Duration::seconds(60), now)
            .await
            .unwrap();
        assert!(!decision.is_allowed());
    }
}
