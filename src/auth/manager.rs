//! Authentication orchestration.
//!
//! [`AuthManager`] sequences the leaf components for every public
//! operation: rate limiter, credential check, risk analyzer, second
//! factor, session manager, token issuer. It holds no mutable state of
//! its own; one instance is built at process start and shared by
//! reference across request handlers.
//!
//! Every security decision lands exactly one audit event before the
//! result is returned. Login enforces this structurally: the flow body
//! marks when it has audited, and the wrapper emits a generic
//! `failed_login` for any rejection that did not.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::models::{
    DeviceInfo, FailedAttemptOutcome, LoginOutcome, LoginRequest, LoginSuccess, Principal,
    PrincipalId, PrincipalStatus, ResetTokenRecord, RiskLevel, Role, SecurityEvent,
    SecurityEventType, SecurityMetrics, SessionId, TokenBundle, TwoFactorSetup,
};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::notify::{EmailTemplate, NotificationSender};
use crate::security::{RateLimiter, RiskAnalyzer, TwoFactorManager, TwoFactorVerification};
use crate::session::SessionManager;
use crate::store::StoreHandles;
use crate::token::{AccessClaims, TokenIssuer};

const LOGIN_WINDOW_SECS: i64 = 60;
const DAILY_WINDOW_HOURS: i64 = 24;
const RESET_TOKEN_TTL_MINS: i64 = 60;
const RESET_TOKEN_BYTES: usize = 32;

fn login_window() -> Duration {
    Duration::seconds(LOGIN_WINDOW_SECS)
}

fn daily_window() -> Duration {
    Duration::hours(DAILY_WINDOW_HOURS)
}

/// Authentication manager
///
/// Entry point for the whole subsystem; request handlers call only the
/// public operations here.
pub struct AuthManager {
    config: AuthConfig,
    stores: StoreHandles,
    sessions: SessionManager,
    tokens: TokenIssuer,
    rate_limiter: RateLimiter,
    risk: RiskAnalyzer,
    two_factor: TwoFactorManager,
    notifier: Arc<dyn NotificationSender>,
    clock: Arc<dyn Clock>,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `config` - Validated policy configuration
    /// * `stores` - Store handles for principals, sessions, events, counters
    /// * `notifier` - Delivery seam for verification/reset messages
    /// * `clock` - Injectable time source
    pub fn new(
        config: AuthConfig,
        stores: StoreHandles,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionManager::new(
            stores.sessions.clone(),
            clock.clone(),
            config.max_sessions,
        );
        let tokens = TokenIssuer::new(&config, clock.clone());
        let rate_limiter = RateLimiter::new(stores.rate_limits.clone(), clock.clone());
        let risk = RiskAnalyzer::new(stores.events.clone(), clock.clone());
        let two_factor = TwoFactorManager::new(
            stores.principals.clone(),
            stores.two_factor.clone(),
            stores.events.clone(),
            clock.clone(),
            config.totp_skew_steps,
            config.backup_code_count,
            config.issuer.clone(),
        );

        Self {
            config,
            stores,
            sessions,
            tokens,
            rate_limiter,
            risk,
            two_factor,
            notifier,
            clock,
        }
    }

    /// Register a new principal.
    ///
    /// The account starts unverified; a verification message is sent
    /// best-effort and login is gated until [`verify_email`](Self::verify_email).
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> AuthResult<Principal> {
        let email = normalize_email(email)?;
        self.validate_password_strength(password)?;

        if self.stores.principals.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let now = self.clock.now();
        let principal = Principal {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: self.hash_password(password)?,
            role,
            status: PrincipalStatus::PendingVerification,
            failed_attempts: 0,
            locked_until: None,
            email_verified: false,
            two_factor_enabled: false,
            two_factor_secret: None,
            backup_code_hashes: vec![],
            password_changed_at: now,
            created_at: now,
        };
        self.stores.principals.insert(&principal).await?;

        if let Err(err) = self
            .notifier
            .send(
                EmailTemplate::VerifyEmail,
                &email,
                serde_json::json!({ "principal_id": principal.id }),
            )
            .await
        {
            log::warn!("verification mail for {email} not sent: {err}");
        }

        log::info!("registered principal {} ({role})", principal.id);
        Ok(principal)
    }

    /// Mark a principal's email address verified, activating the account.
    pub async fn verify_email(&self, principal_id: PrincipalId) -> AuthResult<()> {
        self.stores
            .principals
            .set_email_verified(principal_id, true)
            .await?;
        self.emit(
            SecurityEventType::SecuritySettingChange,
            Some(principal_id),
            RiskLevel::Low,
            serde_json::json!({ "change": "email_verified" }),
            None,
        )
        .await
    }

    /// Request another verification message, bounded per email per day.
    pub async fn resend_verification(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;
        let decision = self
            .rate_limiter
            .allow(
                &RateLimiter::verify_email_key(&email),
                self.config.verification_resends_per_day,
                daily_window(),
            )
            .await?;
        if let Some(retry_after) = decision.retry_after() {
            return Err(AuthError::RateLimitExceeded {
                retry_after_secs: retry_after.num_seconds().max(0) as u64,
            });
        }

        // Silent on unknown addresses; same response either way.
        if let Some(principal) = self.stores.principals.find_by_email(&email).await? {
            if let Err(err) = self
                .notifier
                .send(
                    EmailTemplate::VerifyEmail,
                    &email,
                    serde_json::json!({ "principal_id": principal.id }),
                )
                .await
            {
                log::warn!("verification resend for {email} failed: {err}");
            }
        }
        Ok(())
    }

    /// Authenticate a principal.
    ///
    /// Returns the minted tokens, or [`LoginOutcome::TwoFactorRequired`]
    /// when a second factor is enabled and no code was supplied.
    ///
    /// # Errors
    ///
    /// Every rejection carries a typed error and has produced exactly one
    /// `failed_login` audit event before returning.
    pub async fn login(&self, request: LoginRequest) -> AuthResult<LoginOutcome> {
        let mut audited = false;
        let result = self.login_flow(&request, &mut audited).await;

        if result.is_err() && !audited {
            // Audit completeness must not depend on which failure occurred.
            if let Err(audit_err) = self
                .emit(
                    SecurityEventType::FailedLogin,
                    None,
                    RiskLevel::Medium,
                    serde_json::json!({ "reason": "rejected" }),
                    Some(&request),
                )
                .await
            {
                log::error!("failed to audit rejected login: {audit_err}");
            }
        }
        result
    }

    async fn login_flow(
        &self,
        request: &LoginRequest,
        audited: &mut bool,
    ) -> AuthResult<LoginOutcome> {
        if request.email.trim().is_empty() || !request.email.contains('@') {
            return Err(AuthError::Validation("malformed email address".to_string()));
        }
        if request.password.len() < self.config.password_min_length {
            return Err(AuthError::Validation("password too short".to_string()));
        }

        // Rate limit before any store lookup so timing cannot leak whether
        // the account exists.
        let decision = self
            .rate_limiter
            .allow(
                &RateLimiter::login_key(&request.ip),
                self.config.login_attempts_per_minute,
                login_window(),
            )
            .await?;
        if let Some(retry_after) = decision.retry_after() {
            self.emit(
                SecurityEventType::FailedLogin,
                None,
                RiskLevel::Medium,
                serde_json::json!({ "reason": "rate_limited" }),
                Some(request),
            )
            .await?;
            *audited = true;
            return Err(AuthError::RateLimitExceeded {
                retry_after_secs: retry_after.num_seconds().max(0) as u64,
            });
        }

        let email = request.email.trim().to_lowercase();
        let Some(principal) = self.stores.principals.find_by_email(&email).await? else {
            // Indistinguishable from a wrong password; the wrapper emits
            // the audit event without a principal id.
            return Err(AuthError::InvalidCredentials);
        };
        let now = self.clock.now();

        match principal.status {
            PrincipalStatus::Suspended | PrincipalStatus::Blocked => {
                self.audit_rejection(&principal, request, "account_suspended", RiskLevel::Medium)
                    .await?;
                *audited = true;
                return Err(AuthError::AccountSuspended);
            }
            PrincipalStatus::Active | PrincipalStatus::PendingVerification => {}
        }

        if let Some(locked_until) = principal.locked_until {
            if locked_until > now {
                self.audit_rejection(&principal, request, "account_locked", RiskLevel::Medium)
                    .await?;
                *audited = true;
                return Err(AuthError::AccountLocked { locked_until });
            }
        }

        if self.config.password_max_age_days > 0 {
            let expires_at = principal.password_changed_at
                + Duration::days(i64::from(self.config.password_max_age_days));
            if expires_at <= now {
                self.audit_rejection(&principal, request, "password_expired", RiskLevel::Medium)
                    .await?;
                *audited = true;
                return Err(AuthError::PasswordExpired);
            }
        }

        if !principal.email_verified {
            let resend_available = self
                .rate_limiter
                .would_allow(
                    &RateLimiter::verify_email_key(&email),
                    self.config.verification_resends_per_day,
                    daily_window(),
                )
                .await?;
            self.audit_rejection(&principal, request, "email_not_verified", RiskLevel::Low)
                .await?;
            *audited = true;
            return Err(AuthError::EmailNotVerified { resend_available });
        }

        let risk = self.risk.assess(principal.id).await?;

        let device = device_of(request);
        if principal.two_factor_enabled {
            let Some(code) = request.two_factor_code.as_deref() else {
                self.emit(
                    SecurityEventType::Login,
                    Some(principal.id),
                    risk,
                    serde_json::json!({ "requires_2fa": true }),
                    Some(request),
                )
                .await?;
                *audited = true;
                return Ok(LoginOutcome::TwoFactorRequired);
            };

            match self.two_factor.verify(&principal, code, Some(&device)).await {
                Ok(_) => {}
                Err(AuthError::InvalidTwoFactorCode) => {
                    // Wrong codes count toward the same lockout threshold as
                    // wrong passwords.
                    let outcome = self.record_failed_attempt(principal.id).await?;
                    self.audit_failed_attempt(&principal, request, "invalid_2fa_code", &outcome)
                        .await?;
                    *audited = true;
                    return Err(AuthError::InvalidTwoFactorCode);
                }
                Err(err) => return Err(err),
            }
        }

        if !self.verify_password(&request.password, &principal.password_hash) {
            let outcome = self.record_failed_attempt(principal.id).await?;
            self.audit_failed_attempt(&principal, request, "invalid_password", &outcome)
                .await?;
            *audited = true;
            return Err(AuthError::InvalidCredentials);
        }

        self.stores
            .principals
            .clear_failed_attempts(principal.id)
            .await?;

        let tokens = self.tokens.mint(&principal, request.tenant.as_ref())?;
        self.sessions
            .create(principal.id, tokens.session_id, device)
            .await?;

        self.emit(
            SecurityEventType::Login,
            Some(principal.id),
            risk,
            serde_json::json!({ "session_id": tokens.session_id }),
            Some(request),
        )
        .await?;
        *audited = true;

        log::info!("principal {} logged in (risk {risk})", principal.id);
        Ok(LoginOutcome::Success(LoginSuccess { tokens, risk }))
    }

    /// Invalidate one session. Idempotent: an unknown or already inactive
    /// session is a logged no-op.
    pub async fn logout(&self, session_id: SessionId) -> AuthResult<()> {
        let Some(session) = self.sessions.get(session_id).await? else {
            log::debug!("logout for unknown session {session_id}");
            return Ok(());
        };

        let was_active = self.sessions.invalidate(session_id).await?;
        if was_active {
            self.emit(
                SecurityEventType::Logout,
                Some(session.principal_id),
                RiskLevel::Low,
                serde_json::json!({ "session_id": session_id }),
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Invalidate every active session for a principal; returns the count.
    pub async fn logout_all(&self, principal_id: PrincipalId) -> AuthResult<u64> {
        let count = self.sessions.invalidate_all(principal_id).await?;
        self.emit(
            SecurityEventType::Logout,
            Some(principal_id),
            RiskLevel::Medium,
            serde_json::json!({ "sessions_invalidated": count }),
            None,
        )
        .await?;
        Ok(count)
    }

    /// Change a password given the current one. All sessions are
    /// invalidated, forcing re-authentication everywhere.
    pub async fn change_password(
        &self,
        principal_id: PrincipalId,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let principal = self
            .stores
            .principals
            .get(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;

        if !self.verify_password(current_password, &principal.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        self.rotate_password(&principal, new_password, SecurityEventType::PasswordChange)
            .await
    }

    /// Begin password recovery. Always success-shaped for unknown emails
    /// so the endpoint cannot be used for account enumeration.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email)?;
        let decision = self
            .rate_limiter
            .allow(
                &RateLimiter::reset_key(&email),
                self.config.reset_requests_per_day,
                daily_window(),
            )
            .await?;
        if let Some(retry_after) = decision.retry_after() {
            return Err(AuthError::RateLimitExceeded {
                retry_after_secs: retry_after.num_seconds().max(0) as u64,
            });
        }

        let Some(principal) = self.stores.principals.find_by_email(&email).await? else {
            log::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_reset_token();
        let now = self.clock.now();
        self.stores
            .reset_tokens
            .put(&ResetTokenRecord {
                token_hash: sha256_hex(&token),
                principal_id: principal.id,
                expires_at: now + Duration::minutes(RESET_TOKEN_TTL_MINS),
                used: false,
                created_at: now,
            })
            .await?;

        if let Err(err) = self
            .notifier
            .send(
                EmailTemplate::PasswordReset,
                &email,
                serde_json::json!({ "token": token }),
            )
            .await
        {
            // The token is already stored; delivery failure must not leak
            // through the enumeration-safe response.
            log::error!("reset mail for principal {} failed: {err}", principal.id);
        }
        Ok(())
    }

    /// Complete password recovery with a token from [`forgot_password`](Self::forgot_password).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for an unknown, expired or
    /// already redeemed token.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        self.validate_password_strength(new_password)?;

        let principal_id = self
            .stores
            .reset_tokens
            .consume(&sha256_hex(token), self.clock.now())
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let principal = self
            .stores
            .principals
            .get(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;
        self.rotate_password(&principal, new_password, SecurityEventType::PasswordReset)
            .await
    }

    async fn rotate_password(
        &self,
        principal: &Principal,
        new_password: &str,
        event_type: SecurityEventType,
    ) -> AuthResult<()> {
        self.validate_password_strength(new_password)?;
        let hash = self.hash_password(new_password)?;

        self.stores
            .principals
            .set_password(principal.id, &hash, self.clock.now())
            .await?;
        self.stores
            .principals
            .clear_failed_attempts(principal.id)
            .await?;

        let invalidated = self.sessions.invalidate_all(principal.id).await?;
        self.emit(
            event_type,
            Some(principal.id),
            RiskLevel::Low,
            serde_json::json!({ "sessions_invalidated": invalidated }),
            None,
        )
        .await?;

        log::info!("password rotated for principal {}", principal.id);
        Ok(())
    }

    /// Begin 2FA enrollment; nothing is enabled until confirmation.
    pub async fn setup_two_factor(&self, principal_id: PrincipalId) -> AuthResult<TwoFactorSetup> {
        let principal = self.load_principal(principal_id).await?;
        self.two_factor.setup(&principal).await
    }

    /// Confirm 2FA enrollment with a code from the authenticator.
    pub async fn confirm_two_factor(
        &self,
        principal_id: PrincipalId,
        code: &str,
    ) -> AuthResult<()> {
        let principal = self.load_principal(principal_id).await?;
        self.two_factor.confirm(&principal, code, None).await
    }

    /// Verify a standalone 2FA challenge (step-up flows).
    pub async fn verify_two_factor(
        &self,
        principal_id: PrincipalId,
        code: &str,
    ) -> AuthResult<TwoFactorVerification> {
        let principal = self.load_principal(principal_id).await?;
        self.two_factor.verify(&principal, code, None).await
    }

    /// Disable 2FA. Requires the current password as re-verification.
    pub async fn disable_two_factor(
        &self,
        principal_id: PrincipalId,
        current_password: &str,
    ) -> AuthResult<()> {
        let principal = self.load_principal(principal_id).await?;
        if !self.verify_password(current_password, &principal.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        self.two_factor.disable(&principal, None).await
    }

    /// Re-issue a token pair against an existing session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the refresh token fails
    /// verification or its session is gone or inactive.
    pub async fn refresh_token(&self, refresh_token: &str) -> AuthResult<TokenBundle> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        let session = self
            .sessions
            .get(claims.sid)
            .await?
            .filter(|s| s.active)
            .ok_or_else(|| {
                log::debug!("refresh against missing or inactive session {}", claims.sid);
                AuthError::InvalidToken
            })?;

        let principal = self
            .stores
            .principals
            .get(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        match principal.status {
            PrincipalStatus::Suspended | PrincipalStatus::Blocked => {
                return Err(AuthError::AccountSuspended);
            }
            PrincipalStatus::Active | PrincipalStatus::PendingVerification => {}
        }

        let bundle = self.tokens.mint_for_session(&principal, session.id, None)?;
        self.sessions.touch(session.id).await;
        Ok(bundle)
    }

    /// Validate an access token against its live session.
    ///
    /// Soft miss on any failure; the reason is logged, never surfaced.
    /// A hit refreshes the session's last-activity best-effort.
    pub async fn validate_session(&self, access_token: &str) -> Option<AccessClaims> {
        let claims = self.tokens.verify(access_token)?;

        match self.sessions.get(claims.sid).await {
            Ok(Some(session)) if session.active => {
                self.sessions.touch(session.id).await;
                Some(claims)
            }
            Ok(_) => {
                log::debug!("token for missing or inactive session {}", claims.sid);
                None
            }
            Err(err) => {
                log::warn!("session lookup failed during validation: {err}");
                None
            }
        }
    }

    /// Whether validated claims grant a permission, through the role or
    /// the tenant permission set.
    pub fn has_permission(&self, claims: &AccessClaims, permission: &str) -> bool {
        if claims.role.permissions().contains(&permission) {
            return true;
        }
        claims
            .tenant_permissions
            .as_ref()
            .is_some_and(|perms| perms.iter().any(|p| p == permission))
    }

    /// Like [`has_permission`](Self::has_permission), but errors for use
    /// with `?` in guarded handlers.
    pub fn require_permission(
        &self,
        claims: &AccessClaims,
        permission: &str,
    ) -> AuthResult<()> {
        if self.has_permission(claims, permission) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Aggregate security counters over a trailing window.
    pub async fn security_metrics(&self, window_hours: i64) -> AuthResult<SecurityMetrics> {
        let since = self.clock.now() - Duration::hours(window_hours);
        let events = &self.stores.events;

        Ok(SecurityMetrics {
            window_hours,
            logins: events
                .count_by_type_since(None, SecurityEventType::Login, since)
                .await?,
            failed_logins: events
                .count_by_type_since(None, SecurityEventType::FailedLogin, since)
                .await?,
            password_resets: events
                .count_by_type_since(None, SecurityEventType::PasswordReset, since)
                .await?,
            backup_codes_used: events
                .count_by_type_since(None, SecurityEventType::BackupCodeUsed, since)
                .await?,
            active_sessions: self.sessions.count_active().await?,
        })
    }

    async fn load_principal(&self, principal_id: PrincipalId) -> AuthResult<Principal> {
        self.stores
            .principals
            .get(principal_id)
            .await?
            .ok_or(AuthError::PrincipalNotFound)
    }

    async fn record_failed_attempt(
        &self,
        principal_id: PrincipalId,
    ) -> AuthResult<FailedAttemptOutcome> {
        Ok(self
            .stores
            .principals
            .record_failed_attempt(
                principal_id,
                self.config.lockout_threshold,
                Duration::seconds(self.config.lockout_duration_secs as i64),
                self.clock.now(),
            )
            .await?)
    }

    async fn audit_failed_attempt(
        &self,
        principal: &Principal,
        request: &LoginRequest,
        reason: &str,
        outcome: &FailedAttemptOutcome,
    ) -> AuthResult<()> {
        let locked = outcome.locked_until.is_some();
        let risk = if locked {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
        if locked {
            log::warn!(
                "principal {} locked after {} failed attempts",
                principal.id,
                outcome.attempts
            );
        }
        self.emit(
            SecurityEventType::FailedLogin,
            Some(principal.id),
            risk,
            serde_json::json!({
                "reason": reason,
                "attempts": outcome.attempts,
                "locked": locked,
            }),
            Some(request),
        )
        .await
    }

    async fn audit_rejection(
        &self,
        principal: &Principal,
        request: &LoginRequest,
        reason: &str,
        risk: RiskLevel,
    ) -> AuthResult<()> {
        self.emit(
            SecurityEventType::FailedLogin,
            Some(principal.id),
            risk,
            serde_json::json!({ "reason": reason }),
            Some(request),
        )
        .await
    }

    async fn emit(
        &self,
        event_type: SecurityEventType,
        principal_id: Option<PrincipalId>,
        risk: RiskLevel,
        detail: serde_json::Value,
        request: Option<&LoginRequest>,
    ) -> AuthResult<()> {
        self.stores
            .events
            .append(&SecurityEvent {
                id: Uuid::new_v4(),
                event_type,
                principal_id,
                ip: request.map(|r| r.ip.clone()),
                user_agent: request.map(|r| r.user_agent.clone()),
                risk,
                detail,
                at: self.clock.now(),
            })
            .await?;
        Ok(())
    }

    /// Hash password with Argon2id + pepper
    fn hash_password(&self, password: &str) -> AuthResult<String> {
        let peppered = format!("{}{}", password, self.config.password_pepper);
        let salt = SaltString::generate(&mut OsRng);
        Ok(Argon2::default()
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let peppered = format!("{}{}", password, self.config.password_pepper);
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .is_ok()
    }

    fn validate_password_strength(&self, password: &str) -> AuthResult<()> {
        if password.len() < self.config.password_min_length {
            return Err(AuthError::WeakPassword(format!(
                "must be at least {} characters",
                self.config.password_min_length
            )));
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AuthError::WeakPassword(
                "must contain a digit".to_string(),
            ));
        }
        if !password.chars().any(|c| c.is_ascii_uppercase())
            || !password.chars().any(|c| c.is_ascii_lowercase())
        {
            return Err(AuthError::WeakPassword(
                "must mix upper and lower case".to_string(),
            ));
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.len() > 254 {
        return Err(AuthError::Validation("malformed email address".to_string()));
    }
    Ok(email)
}

fn device_of(request: &LoginRequest) -> DeviceInfo {
    DeviceInfo {
        ip: request.ip.clone(),
        user_agent: request.user_agent.clone(),
        device_name: request.device_name.clone(),
    }
}

fn generate_reset_token() -> String {
    let bytes: [u8; RESET_TOKEN_BYTES] = rand::rng().random();
    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::RecordingSender;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn manager() -> (AuthManager, Arc<MemoryStore>, Arc<ManualClock>, Arc<RecordingSender>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sender = Arc::new(RecordingSender::new());
        let config = AuthConfig::with_secrets(
            "access-secret-0123456789-0123456789".to_string(),
            "refresh-secret-0123456789-0123456789".to_string(),
            "pepper-0123456789".to_string(),
        );
        let manager = AuthManager::new(
            config,
            StoreHandles::from_single(store.clone()),
            sender.clone(),
            clock.clone(),
        );
        (manager, store, clock, sender)
    }

    #[test]
    fn test_password_hash_round_trip() {
        let (manager, _store, _clock, _sender) = manager();
        let hash = manager.hash_password("Sup3rSecret").unwrap();

        assert!(manager.verify_password("Sup3rSecret", &hash));
        assert!(!manager.verify_password("Sup3rSecreT", &hash));
        assert!(!manager.verify_password("Sup3rSecret", "not-a-phc-string"));
    }

    #[test]
    fn test_password_strength_policy() {
        let (manager, _store, _clock, _sender) = manager();

        assert!(manager.validate_password_strength("Sup3rSecret").is_ok());
        for weak in ["Ab1", "nodigitshere", "NOLOWER123", "noupper123"] {
            assert!(matches!(
                manager.validate_password_strength(weak),
                Err(AuthError::WeakPassword(_))
            ));
        }
    }

    #[test]
    fn test_reset_token_is_hex_and_unique() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_register_lowercases_and_rejects_duplicates() {
        let (manager, _store, _clock, sender) = manager();

        let principal = manager
            .register("User@Example.COM", "Sup3rSecret", Role::Member)
            .await
            .unwrap();
        assert_eq!(principal.email, "user@example.com");
        assert_eq!(principal.status, PrincipalStatus::PendingVerification);
        assert_eq!(sender.sent().len(), 1);

        assert!(matches!(
            manager
                .register("user@example.com", "Sup3rSecret", Role::Member)
                .await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_has_permission_checks_role_and_tenant() {
        let (manager, _store, _clock, _sender) = manager();
        let mut claims = AccessClaims {
            sub: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            role: Role::Member,
            sid: Uuid::new_v4(),
            iss: "gatekeeper".to_string(),
            aud: "gatekeeper".to_string(),
            iat: 0,
            exp: 0,
            tenant_id: None,
            tenant_role: None,
            tenant_permissions: None,
        };

        assert!(manager.has_permission(&claims, "profile:read"));
        assert!(!manager.has_permission(&claims, "security:write"));

        claims.tenant_permissions = Some(vec!["billing:write".to_string()]);
        assert!(manager.has_permission(&claims, "billing:write"));

        assert!(manager.require_permission(&claims, "billing:write").is_ok());
        assert!(matches!(
            manager.require_permission(&claims, "security:write"),
            Err(AuthError::InsufficientPermissions)
        ));
    }

    #[tokio::test]
    async fn test_forgot_password_is_enumeration_safe() {
        let (manager, _store, _clock, sender) = manager();

        manager.forgot_password("nobody@example.com").await.unwrap();
        assert!(sender.sent().is_empty());
    }
}
