//! Authentication data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Principal ID type
pub type PrincipalId = Uuid;

/// Session ID type
pub type SessionId = Uuid;

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalStatus {
    PendingVerification,
    Active,
    Suspended,
    Blocked,
}

impl std::fmt::Display for PrincipalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalStatus::PendingVerification => write!(f, "pending_verification"),
            PrincipalStatus::Active => write!(f, "active"),
            PrincipalStatus::Suspended => write!(f, "suspended"),
            PrincipalStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for PrincipalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_verification" => Ok(PrincipalStatus::PendingVerification),
            "active" => Ok(PrincipalStatus::Active),
            "suspended" => Ok(PrincipalStatus::Suspended),
            "blocked" => Ok(PrincipalStatus::Blocked),
            other => Err(format!("unknown principal status: {other}")),
        }
    }
}

/// Role granted to a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Manager,
    Admin,
}

impl Role {
    /// Static permission set for the role.
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Member => &["session:read", "profile:read", "profile:write"],
            Role::Manager => &[
                "session:read",
                "profile:read",
                "profile:write",
                "principal:read",
                "metrics:read",
            ],
            Role::Admin => &[
                "session:read",
                "profile:read",
                "profile:write",
                "principal:read",
                "principal:write",
                "metrics:read",
                "security:write",
            ],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Manager => write!(f, "manager"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated entity owning credentials and sessions.
///
/// Owned exclusively by the principal store and mutated only through
/// explicit [`AuthManager`](crate::auth::AuthManager) operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    /// Stored lowercased; lookups lowercase before querying.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: PrincipalStatus,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    /// Base32-encoded TOTP secret, present once 2FA is confirmed.
    pub two_factor_secret: Option<String>,
    /// SHA-256 digests of unredeemed single-use backup codes.
    pub backup_code_hashes: Vec<String>,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Device/network snapshot captured at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub ip: String,
    pub user_agent: String,
    pub device_name: Option<String>,
}

/// One authenticated device/browser context.
///
/// The `active` flag is monotonic: once a session goes inactive it is
/// never reactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub device: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub active: bool,
}

/// Coarse classification of recent authentication activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Security event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    Login,
    FailedLogin,
    Logout,
    PasswordChange,
    PasswordReset,
    SecuritySettingChange,
    BackupCodeUsed,
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityEventType::Login => write!(f, "login"),
            SecurityEventType::FailedLogin => write!(f, "failed_login"),
            SecurityEventType::Logout => write!(f, "logout"),
            SecurityEventType::PasswordChange => write!(f, "password_change"),
            SecurityEventType::PasswordReset => write!(f, "password_reset"),
            SecurityEventType::SecuritySettingChange => write!(f, "security_setting_change"),
            SecurityEventType::BackupCodeUsed => write!(f, "backup_code_used"),
        }
    }
}

/// Append-only audit record emitted after every security decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub event_type: SecurityEventType,
    pub principal_id: Option<PrincipalId>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub risk: RiskLevel,
    /// Free-form structured detail.
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Result of an atomic failed-attempt increment.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttemptOutcome {
    /// Counter value after the increment
    pub attempts: u32,
    /// Set when this increment crossed the lockout threshold
    pub locked_until: Option<DateTime<Utc>>,
}

/// Unconfirmed 2FA material, held aside until setup is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTwoFactor {
    pub principal_id: PrincipalId,
    pub secret: String,
    pub backup_code_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Hashed, time-boxed, single-use password reset token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetTokenRecord {
    /// SHA-256 digest of the token handed to the principal.
    pub token_hash: String,
    pub principal_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Tenant scoping folded into access-token claims when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Tokens minted for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: u64,
    pub session_id: SessionId,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub two_factor_code: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub device_name: Option<String>,
    pub tenant: Option<TenantContext>,
}

/// Successful login payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSuccess {
    pub tokens: TokenBundle,
    pub risk: RiskLevel,
}

/// Login outcome: authenticated, or a challenge the caller must answer.
///
/// The challenge case is an ordinary variant rather than an error so that
/// front-ends can re-prompt without string matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    Success(LoginSuccess),
    TwoFactorRequired,
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success(_))
    }
}

/// Two-factor setup response; the plaintext backup codes are shown once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// Aggregate security counters over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub window_hours: i64,
    pub logins: u64,
    pub failed_logins: u64,
    pub password_resets: u64,
    pub backup_codes_used: u64,
    pub active_sessions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::Medium.max(RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PrincipalStatus::PendingVerification,
            PrincipalStatus::Active,
            PrincipalStatus::Suspended,
            PrincipalStatus::Blocked,
        ] {
            let parsed: PrincipalStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_role_permissions_are_cumulative() {
        for perm in Role::Member.permissions() {
            assert!(Role::Admin.permissions().contains(perm));
        }
        assert!(Role::Admin.permissions().contains(&"security:write"));
        assert!(!Role::Member.permissions().contains(&"security:write"));
    }

    #[test]
    fn test_event_type_display_matches_wire_names() {
        assert_eq!(SecurityEventType::FailedLogin.to_string(), "failed_login");
        assert_eq!(
            SecurityEventType::BackupCodeUsed.to_string(),
            "backup_code_used"
        );
    }
}
