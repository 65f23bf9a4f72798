//! Authentication error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// JWT token error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Input failed validation
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// Wrong email or password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account temporarily locked after repeated failures
    #[error("Account locked until {locked_until}")]
    AccountLocked { locked_until: DateTime<Utc> },

    /// Account suspended or blocked by an operator
    #[error("Account suspended")]
    AccountSuspended,

    /// Email address not yet verified
    #[error("Email not verified")]
    EmailNotVerified { resend_available: bool },

    /// Password older than the configured maximum age
    #[error("Password expired")]
    PasswordExpired,

    /// Rate limited
    #[error("Too many attempts, please try again later")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// Invalid 2FA code
    #[error("Invalid two-factor authentication code")]
    InvalidTwoFactorCode,

    /// 2FA not enabled
    #[error("Two-factor authentication not enabled")]
    TwoFactorNotEnabled,

    /// 2FA already confirmed for this principal
    #[error("Two-factor authentication already enabled")]
    TwoFactorAlreadyEnabled,

    /// No pending 2FA setup to confirm
    #[error("Two-factor setup not started")]
    TwoFactorSetupMissing,

    /// Invalid or expired token
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Principal not found
    #[error("Principal not found")]
    PrincipalNotFound,

    /// Email already registered
    #[error("Email already registered")]
    EmailTaken,

    /// Caller lacks the required permission
    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl AuthError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Store(_) => "internal",
            AuthError::Jwt(_) => "invalid_token",
            AuthError::HashingFailed => "internal",
            AuthError::Validation(_) => "invalid_input",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::AccountSuspended => "account_suspended",
            AuthError::EmailNotVerified { .. } => "email_not_verified",
            AuthError::PasswordExpired => "password_expired",
            AuthError::RateLimitExceeded { .. } => "rate_limited",
            AuthError::InvalidTwoFactorCode => "invalid_2fa_code",
            AuthError::TwoFactorNotEnabled => "2fa_not_enabled",
            AuthError::TwoFactorAlreadyEnabled => "2fa_already_enabled",
            AuthError::TwoFactorSetupMissing => "2fa_setup_missing",
            AuthError::InvalidToken => "invalid_token",
            AuthError::PrincipalNotFound => "principal_not_found",
            AuthError::EmailTaken => "email_taken",
            AuthError::InsufficientPermissions => "insufficient_permissions",
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Store, hashing and JWT errors are sanitized to prevent disclosure of
    /// internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Store(_) | AuthError::HashingFailed => "Internal server error".to_string(),
            AuthError::Jwt(_) => "Authentication failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
