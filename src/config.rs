//! Authentication policy configuration.
//!
//! Consolidates all environment variable reads and provides validated
//! configuration. Signing secrets and the password pepper are required;
//! every quantitative policy has a default.

use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Complete authentication policy, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 secret for access tokens (required)
    pub access_secret: String,
    /// HS256 secret for refresh tokens, distinct from the access secret (required)
    pub refresh_secret: String,
    /// Server-side pepper mixed into password hashes (required)
    pub password_pepper: String,
    /// `iss` claim on minted tokens
    pub issuer: String,
    /// `aud` claim on minted tokens
    pub audience: String,
    /// Access-token lifetime in seconds
    pub access_ttl_secs: u64,
    /// Refresh-token lifetime in seconds
    pub refresh_ttl_secs: u64,
    /// Active sessions allowed per principal
    pub max_sessions: usize,
    /// Login attempts allowed per IP per minute
    pub login_attempts_per_minute: u32,
    /// Password-reset requests allowed per email per day
    pub reset_requests_per_day: u32,
    /// Verification-mail resends allowed per email per day
    pub verification_resends_per_day: u32,
    /// Consecutive failed attempts before lockout
    pub lockout_threshold: u32,
    /// Lockout duration in seconds
    pub lockout_duration_secs: u64,
    /// TOTP tolerance in time steps either side of now
    pub totp_skew_steps: u8,
    /// Single-use backup codes issued at 2FA setup
    pub backup_code_count: usize,
    /// Minimum password length
    pub password_min_length: usize,
    /// Maximum password age in days; 0 disables expiry
    pub password_max_age_days: u32,
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required secret is missing or a value fails
    /// validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let access_secret =
            std::env::var("AUTH_ACCESS_SECRET").map_err(|_| ConfigError::MissingRequired {
                var: "AUTH_ACCESS_SECRET".to_string(),
                hint: "Generate with: openssl rand -hex 32".to_string(),
            })?;

        let refresh_secret =
            std::env::var("AUTH_REFRESH_SECRET").map_err(|_| ConfigError::MissingRequired {
                var: "AUTH_REFRESH_SECRET".to_string(),
                hint: "Generate with: openssl rand -hex 32".to_string(),
            })?;

        let password_pepper =
            std::env::var("AUTH_PASSWORD_PEPPER").map_err(|_| ConfigError::MissingRequired {
                var: "AUTH_PASSWORD_PEPPER".to_string(),
                hint: "Generate with: openssl rand -hex 16".to_string(),
            })?;

        let config = Self {
            access_secret,
            refresh_secret,
            password_pepper,
            issuer: std::env::var("AUTH_ISSUER").unwrap_or_else(|_| "gatekeeper".to_string()),
            audience: std::env::var("AUTH_AUDIENCE").unwrap_or_else(|_| "gatekeeper".to_string()),
            access_ttl_secs: parse_env_or("AUTH_ACCESS_TTL_SECS", 3600),
            refresh_ttl_secs: parse_env_or("AUTH_REFRESH_TTL_SECS", 604_800),
            max_sessions: parse_env_or("AUTH_MAX_SESSIONS", 5),
            login_attempts_per_minute: parse_env_or("AUTH_LOGIN_ATTEMPTS_PER_MINUTE", 10),
            reset_requests_per_day: parse_env_or("AUTH_RESET_REQUESTS_PER_DAY", 3),
            verification_resends_per_day: parse_env_or("AUTH_VERIFICATION_RESENDS_PER_DAY", 3),
            lockout_threshold: parse_env_or("AUTH_LOCKOUT_THRESHOLD", 5),
            lockout_duration_secs: parse_env_or("AUTH_LOCKOUT_DURATION_SECS", 900),
            totp_skew_steps: parse_env_or("AUTH_TOTP_SKEW_STEPS", 2),
            backup_code_count: parse_env_or("AUTH_BACKUP_CODE_COUNT", 8),
            password_min_length: parse_env_or("AUTH_PASSWORD_MIN_LENGTH", 8),
            password_max_age_days: parse_env_or("AUTH_PASSWORD_MAX_AGE_DAYS", 0),
        };

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from secrets with default policy values.
    pub fn with_secrets(
        access_secret: impl Into<String>,
        refresh_secret: impl Into<String>,
        password_pepper: impl Into<String>,
    ) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            password_pepper: password_pepper.into(),
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 604_800,
            max_sessions: 5,
            login_attempts_per_minute: 10,
            reset_requests_per_day: 3,
            verification_resends_per_day: 3,
            lockout_threshold: 5,
            lockout_duration_secs: 900,
            totp_skew_steps: 2,
            backup_code_count: 8,
            password_min_length: 8,
            password_max_age_days: 0,
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "AUTH_ACCESS_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.refresh_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "AUTH_REFRESH_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::Invalid {
                var: "AUTH_REFRESH_SECRET".to_string(),
                reason: "Must differ from AUTH_ACCESS_SECRET".to_string(),
            });
        }

        if self.password_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "AUTH_PASSWORD_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                var: "AUTH_MAX_SESSIONS".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }

        if self.lockout_threshold == 0 {
            return Err(ConfigError::Invalid {
                var: "AUTH_LOCKOUT_THRESHOLD".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }

        if self.access_ttl_secs == 0 || self.refresh_ttl_secs <= self.access_ttl_secs {
            return Err(ConfigError::Invalid {
                var: "AUTH_REFRESH_TTL_SECS".to_string(),
                reason: format!(
                    "Must be greater than AUTH_ACCESS_TTL_SECS ({})",
                    self.access_ttl_secs
                ),
            });
        }

        Ok(())
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn valid_config() -> AuthConfig {
        AuthConfig::with_secrets("a".repeat(32), "b".repeat(32), "c".repeat(16))
    }

    #[test]
    fn test_defaults_are_valid() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = AuthConfig::with_secrets("short", "b".repeat(32), "c".repeat(16));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let config = AuthConfig::with_secrets("a".repeat(32), "a".repeat(32), "c".repeat(16));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_ttl_must_exceed_access_ttl() {
        let mut config = valid_config();
        config.refresh_ttl_secs = config.access_ttl_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_missing_secret_has_hint() {
        unsafe {
            std::env::remove_var("AUTH_ACCESS_SECRET");
            std::env::remove_var("AUTH_REFRESH_SECRET");
            std::env::remove_var("AUTH_PASSWORD_PEPPER");
        }
        let err = AuthConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("AUTH_ACCESS_SECRET"));
        assert!(err.to_string().contains("openssl"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        unsafe {
            std::env::set_var("AUTH_ACCESS_SECRET", "a".repeat(32));
            std::env::set_var("AUTH_REFRESH_SECRET", "b".repeat(32));
            std::env::set_var("AUTH_PASSWORD_PEPPER", "c".repeat(16));
            std::env::set_var("AUTH_MAX_SESSIONS", "3");
        }
        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.max_sessions, 3);
        unsafe {
            std::env::remove_var("AUTH_ACCESS_SECRET");
            std::env::remove_var("AUTH_REFRESH_SECRET");
            std::env::remove_var("AUTH_PASSWORD_PEPPER");
            std::env::remove_var("AUTH_MAX_SESSIONS");
        }
    }
}
