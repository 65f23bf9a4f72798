//! TOTP second factor with single-use backup codes.
//!
//! Setup is two-phase: generated material sits in a pending area and only
//! lands on the principal once the caller proves possession of the
//! authenticator by confirming a valid code. Backup codes are stored only
//! as SHA-256 digests; the plaintext is shown exactly once at setup.

use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::auth::errors::{AuthError, AuthResult};
use crate::auth::models::{
    DeviceInfo, PendingTwoFactor, Principal, RiskLevel, SecurityEvent, SecurityEventType,
    TwoFactorSetup,
};
use crate::clock::Clock;
use crate::store::{EventStore, PrincipalStore, TwoFactorStore};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECS: u64 = 30;
const SECRET_BYTES: usize = 20;
const BACKUP_CODE_CHARS: usize = 8;

/// How a 2FA challenge was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorVerification {
    Totp,
    /// A backup code was redeemed; `remaining` are left.
    BackupCode { remaining: usize },
}

/// Manages TOTP enrollment, verification and backup codes.
#[derive(Clone)]
pub struct TwoFactorManager {
    principals: Arc<dyn PrincipalStore>,
    pending: Arc<dyn TwoFactorStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    skew_steps: u8,
    backup_code_count: usize,
    issuer: String,
}

impl TwoFactorManager {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        pending: Arc<dyn TwoFactorStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        skew_steps: u8,
        backup_code_count: usize,
        issuer: String,
    ) -> Self {
        Self {
            principals,
            pending,
            events,
            clock,
            skew_steps,
            backup_code_count,
            issuer,
        }
    }

    /// Begin enrollment: generate a secret and backup codes into the
    /// pending area. Nothing on the principal changes until
    /// [`confirm`](Self::confirm) succeeds.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::TwoFactorAlreadyEnabled`] if the principal
    /// already has a confirmed second factor.
    pub async fn setup(&self, principal: &Principal) -> AuthResult<TwoFactorSetup> {
        if principal.two_factor_enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }

        let mut rng = rand::rng();
        let raw: [u8; SECRET_BYTES] = rng.random();
        let Secret::Encoded(secret) = Secret::Raw(raw.to_vec()).to_encoded() else {
            unreachable!("to_encoded always yields the encoded variant")
        };

        let backup_codes: Vec<String> = (0..self.backup_code_count)
            .map(|_| generate_backup_code(&mut rng))
            .collect();
        let backup_code_hashes = backup_codes.iter().map(|c| hash_backup_code(c)).collect();

        self.pending
            .put_pending(&PendingTwoFactor {
                principal_id: principal.id,
                secret: secret.clone(),
                backup_code_hashes,
                created_at: self.clock.now(),
            })
            .await?;

        let provisioning_uri = self.provisioning_uri(&principal.email, &secret);
        Ok(TwoFactorSetup {
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Confirm enrollment with a code from the authenticator, committing
    /// the pending material onto the principal.
    pub async fn confirm(
        &self,
        principal: &Principal,
        code: &str,
        device: Option<&DeviceInfo>,
    ) -> AuthResult<()> {
        let pending = self
            .pending
            .get_pending(principal.id)
            .await?
            .ok_or(AuthError::TwoFactorSetupMissing)?;

        if !self.check_totp(&pending.secret, code)? {
            return Err(AuthError::InvalidTwoFactorCode);
        }

        self.principals
            .set_two_factor(
                principal.id,
                true,
                Some(pending.secret),
                Some(pending.backup_code_hashes),
            )
            .await?;
        self.pending.clear_pending(principal.id).await?;

        self.emit_setting_change(principal, "two_factor_enabled", device)
            .await?;
        log::info!("2fa enabled for principal {}", principal.id);
        Ok(())
    }

    /// Verify a challenge answer: a current TOTP code, or failing that a
    /// backup code, which is consumed on success.
    pub async fn verify(
        &self,
        principal: &Principal,
        code: &str,
        device: Option<&DeviceInfo>,
    ) -> AuthResult<TwoFactorVerification> {
        if !principal.two_factor_enabled {
            return Err(AuthError::TwoFactorNotEnabled);
        }
        let secret = principal
            .two_factor_secret
            .as_deref()
            .ok_or(AuthError::TwoFactorNotEnabled)?;

        if self.check_totp(secret, code)? {
            return Ok(TwoFactorVerification::Totp);
        }

        let digest = hash_backup_code(code);
        if let Some(remaining) = self
            .principals
            .consume_backup_code(principal.id, &digest)
            .await?
        {
            self.events
                .append(&SecurityEvent {
                    id: Uuid::new_v4(),
                    event_type: SecurityEventType::BackupCodeUsed,
                    principal_id: Some(principal.id),
                    ip: device.map(|d| d.ip.clone()),
                    user_agent: device.map(|d| d.user_agent.clone()),
                    risk: RiskLevel::Medium,
                    detail: serde_json::json!({ "remaining": remaining }),
                    at: self.clock.now(),
                })
                .await?;
            log::warn!(
                "backup code redeemed for principal {} ({remaining} remaining)",
                principal.id
            );
            return Ok(TwoFactorVerification::BackupCode { remaining });
        }

        Err(AuthError::InvalidTwoFactorCode)
    }

    /// Remove the second factor and all backup material.
    pub async fn disable(
        &self,
        principal: &Principal,
        device: Option<&DeviceInfo>,
    ) -> AuthResult<()> {
        if !principal.two_factor_enabled {
            return Err(AuthError::TwoFactorNotEnabled);
        }

        self.principals
            .set_two_factor(principal.id, false, None, Some(Vec::new()))
            .await?;
        self.pending.clear_pending(principal.id).await?;

        self.emit_setting_change(principal, "two_factor_disabled", device)
            .await?;
        log::info!("2fa disabled for principal {}", principal.id);
        Ok(())
    }

    fn check_totp(&self, secret_b32: &str, code: &str) -> AuthResult<bool> {
        let secret = Secret::Encoded(secret_b32.to_string())
            .to_bytes()
            .map_err(|err| AuthError::Validation(format!("malformed totp secret: {err}")))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            self.skew_steps,
            TOTP_STEP_SECS,
            secret,
        )
        .map_err(|err| AuthError::Validation(format!("totp init failed: {err}")))?;

        let now = self.clock.now().timestamp().max(0) as u64;
        Ok(totp.check(code, now))
    }

    fn provisioning_uri(&self, email: &str, secret: &str) -> String {
        let label = email.replace('@', "%40");
        format!(
            "otpauth://totp/{issuer}:{label}?secret={secret}&issuer={issuer}\
             &algorithm=SHA1&digits={TOTP_DIGITS}&period={TOTP_STEP_SECS}",
            issuer = self.issuer,
        )
    }

    async fn emit_setting_change(
        &self,
        principal: &Principal,
        change: &str,
        device: Option<&DeviceInfo>,
    ) -> AuthResult<()> {
        self.events
            .append(&SecurityEvent {
                id: Uuid::new_v4(),
                event_type: SecurityEventType::SecuritySettingChange,
                principal_id: Some(principal.id),
                ip: device.map(|d| d.ip.clone()),
                user_agent: device.map(|d| d.user_agent.clone()),
                risk: RiskLevel::Low,
                detail: serde_json::json!({ "change": change }),
                at: self.clock.now(),
            })
            .await?;
        Ok(())
    }
}

fn generate_backup_code<R: Rng>(rng: &mut R) -> String {
    let chars: String = rng
        .sample_iter(Alphanumeric)
        .take(BACKUP_CODE_CHARS)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

/// Digest of a backup code after normalization (case and separators are
/// cosmetic).
fn hash_backup_code(code: &str) -> String {
    let normalized: String = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{PrincipalStatus, Role};
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            password_hash: String::new(),
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

    fn manager() -> (TwoFactorManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = TwoFactorManager::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            1,
            8,
            "gatekeeper".to_string(),
        );
        (manager, store, clock)
    }

    fn code_for(secret_b32: &str, clock: &ManualClock) -> String {
        let secret = Secret::Encoded(secret_b32.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, secret).unwrap();
        totp.generate(clock.now().timestamp() as u64)
    }

    async fn enrolled() -> (TwoFactorManager, Arc<MemoryStore>, Arc<ManualClock>, Principal, Vec<String>) {
        let (manager, store, clock) = manager();
        let mut p = principal();
        store.insert(&p).await.unwrap();

        let setup = manager.setup(&p).await.unwrap();
        let code = code_for(&setup.secret, &clock);
        manager.confirm(&p, &code, None).await.unwrap();

        p = store.get(p.id).await.unwrap().unwrap();
        (manager, store, clock, p, setup.backup_codes)
    }

    #[tokio::test]
    async fn test_setup_generates_pending_material() {
        let (manager, store, _clock) = manager();
        let p = principal();
        store.insert(&p).await.unwrap();

        let setup = manager.setup(&p).await.unwrap();
        assert_eq!(setup.backup_codes.len(), 8);
        for code in &setup.backup_codes {
            assert_eq!(code.len(), 9);
            assert_eq!(code.as_bytes()[4], b'-');
        }
        assert!(setup.provisioning_uri.starts_with("otpauth://totp/gatekeeper:"));
        assert!(setup.provisioning_uri.contains(&setup.secret));

        // Principal untouched until confirmation.
        let fresh = store.get(p.id).await.unwrap().unwrap();
        assert!(!fresh.two_factor_enabled);
        assert!(store.get_pending(p.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_setup_rejected_when_already_enabled() {
        let (manager, store, _clock) = manager();
        let mut p = principal();
        p.two_factor_enabled = true;
        store.insert(&p).await.unwrap();

        assert!(matches!(
            manager.setup(&p).await,
            Err(AuthError::TwoFactorAlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_confirm_commits_and_clears_pending() {
        let (_manager, store, _clock, p, _codes) = enrolled().await;

        assert!(p.two_factor_enabled);
        assert!(p.two_factor_secret.is_some());
        assert_eq!(p.backup_code_hashes.len(), 8);
        assert!(store.get_pending(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_with_wrong_code_keeps_pending() {
        let (manager, store, _clock) = manager();
        let p = principal();
        store.insert(&p).await.unwrap();
        manager.setup(&p).await.unwrap();

        assert!(matches!(
            manager.confirm(&p, "000000", None).await,
            Err(AuthError::InvalidTwoFactorCode)
        ));
        assert!(store.get_pending(p.id).await.unwrap().is_some());
        assert!(!store.get(p.id).await.unwrap().unwrap().two_factor_enabled);
    }

    #[tokio::test]
    async fn test_confirm_without_setup_fails() {
        let (manager, store, _clock) = manager();
        let p = principal();
        store.insert(&p).await.unwrap();

        assert!(matches!(
            manager.confirm(&p, "123456", None).await,
            Err(AuthError::TwoFactorSetupMissing)
        ));
    }

    #[tokio::test]
    async fn test_verify_accepts_current_totp_code() {
        let (manager, _store, clock, p, _codes) = enrolled().await;
        let code = code_for(p.two_factor_secret.as_deref().unwrap(), &clock);

        assert_eq!(
            manager.verify(&p, &code, None).await.unwrap(),
            TwoFactorVerification::Totp
        );
    }

    #[tokio::test]
    async fn test_verify_rejects_stale_code() {
        let (manager, _store, clock, p, _codes) = enrolled().await;
        let code = code_for(p.two_factor_secret.as_deref().unwrap(), &clock);
        clock.advance(Duration::minutes(5));

        assert!(matches!(
            manager.verify(&p, &code, None).await,
            Err(AuthError::InvalidTwoFactorCode)
        ));
    }

    #[tokio::test]
    async fn test_backup_code_is_single_use() {
        let (manager, store, _clock, p, codes) = enrolled().await;

        let outcome = manager.verify(&p, &codes[0], None).await.unwrap();
        assert_eq!(outcome, TwoFactorVerification::BackupCode { remaining: 7 });

        let p = store.get(p.id).await.unwrap().unwrap();
        assert!(matches!(
            manager.verify(&p, &codes[0], None).await,
            Err(AuthError::InvalidTwoFactorCode)
        ));

        let events = store.events_snapshot().await;
        let used: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::BackupCodeUsed)
            .collect();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].risk, RiskLevel::Medium);
        assert_eq!(used[0].detail["remaining"], 7);
    }

    #[tokio::test]
    async fn test_backup_code_normalization() {
        let (manager, _store, _clock, p, codes) = enrolled().await;
        let sloppy = codes[1].replace('-', "").to_lowercase();

        assert!(matches!(
            manager.verify(&p, &sloppy, None).await.unwrap(),
            TwoFactorVerification::BackupCode { .. }
        ));
    }

    #[tokio::test]
    async fn test_verify_without_enrollment_fails() {
        let (manager, store, _clock) = manager();
        let p = principal();
        store.insert(&p).await.unwrap();

        assert!(matches!(
            manager.verify(&p, "123456", None).await,
            Err(AuthError::TwoFactorNotEnabled)
        ));
    }

    #[tokio::test]
    async fn test_disable_clears_material() {
        let (manager, store, _clock, p, _codes) = enrolled().await;

        manager.disable(&p, None).await.unwrap();
        let p = store.get(p.id).await.unwrap().unwrap();
        assert!(!p.two_factor_enabled);
        assert!(p.two_factor_secret.is_none());
        assert!(p.backup_code_hashes.is_empty());
    }
}
