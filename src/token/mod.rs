//! Signed token issuance and validation.
//!
//! Access and refresh tokens are HS256 JWTs signed with distinct secrets
//! and scoped by issuer/audience. The issuer is stateless apart from the
//! key material; the session correlation id (`sid`) it generates at mint
//! time becomes the stored session id.

use chrono::Duration;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::errors::{AuthError, AuthResult};
use crate::auth::models::{Principal, Role, SessionId, TenantContext, TokenBundle};
use crate::clock::Clock;
use crate::config::AuthConfig;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Principal id
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    /// Session correlation id
    pub sid: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_permissions: Option<Vec<String>>,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Principal id
    pub sub: Uuid,
    /// Session correlation id
    pub sid: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and validates signed access/refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::seconds(config.access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs as i64),
            clock,
        }
    }

    /// Mint an access/refresh token pair for a fresh session.
    ///
    /// Generates the session correlation id; the caller creates the session
    /// record under the returned `session_id`.
    pub fn mint(
        &self,
        principal: &Principal,
        tenant: Option<&TenantContext>,
    ) -> AuthResult<TokenBundle> {
        self.mint_for_session(principal, Uuid::new_v4(), tenant)
    }

    /// Mint a token pair bound to an existing session (refresh flow).
    pub fn mint_for_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
        tenant: Option<&TenantContext>,
    ) -> AuthResult<TokenBundle> {
        let now = self.clock.now();

        let access_claims = AccessClaims {
            sub: principal.id,
            email: principal.email.clone(),
            role: principal.role,
            sid: session_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            tenant_id: tenant.map(|t| t.tenant_id.clone()),
            tenant_role: tenant.map(|t| t.role.clone()),
            tenant_permissions: tenant.map(|t| t.permissions.clone()),
        };
        let access_token = encode(&Header::default(), &access_claims, &self.access_encoding)?;

        let refresh_claims = RefreshClaims {
            sub: principal.id,
            sid: session_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };
        let refresh_token = encode(&Header::default(), &refresh_claims, &self.refresh_encoding)?;

        Ok(TokenBundle {
            access_token,
            refresh_token,
            expires_in_secs: self.access_ttl.num_seconds().max(0) as u64,
            session_id,
        })
    }

    /// Validate an access token.
    ///
    /// Returns `None` on any malformed, tampered or expired input; the
    /// reason is logged, never surfaced.
    pub fn verify(&self, token: &str) -> Option<AccessClaims> {
        match decode::<AccessClaims>(token, &self.access_decoding, &self.validation()) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                log::debug!("access token rejected: {err}");
                None
            }
        }
    }

    /// Validate a refresh token.
    ///
    /// Failure gates re-issuance, so it is a typed error rather than a
    /// soft miss.
    pub fn verify_refresh(&self, token: &str) -> AuthResult<RefreshClaims> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|err| {
                log::debug!("refresh token rejected: {err}");
                AuthError::InvalidToken
            })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::PrincipalStatus;
    use crate::clock::{ManualClock, SystemClock};
    use chrono::Utc;

    fn test_config() -> AuthConfig {
        AuthConfig::with_secrets(
            "access-secret-0123456789-0123456789".to_string(),
            "refresh-secret-0123456789-0123456789".to_string(),
            "pepper-0123456789".to_string(),
        )
    }

    fn test_principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Manager,
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

    #[test]
    fn test_access_token_round_trip() {
        let issuer = TokenIssuer::new(&test_config(), Arc::new(SystemClock));
        let principal = test_principal();

        let bundle = issuer.mint(&principal, None).unwrap();
        let claims = issuer.verify(&bundle.access_token).unwrap();
        assert_eq!(claims.sub, principal.id);
        assert_eq!(claims.role, Role::Manager);
        assert_eq!(claims.sid, bundle.session_id);
        assert!(claims.tenant_id.is_none());
    }

    #[test]
    fn test_tenant_claims_present_when_supplied() {
        let issuer = TokenIssuer::new(&test_config(), Arc::new(SystemClock));
        let tenant = TenantContext {
            tenant_id: "acme".to_string(),
            role: "owner".to_string(),
            permissions: vec!["billing:write".to_string()],
        };

        let bundle = issuer.mint(&test_principal(), Some(&tenant)).unwrap();
        let claims = issuer.verify(&bundle.access_token).unwrap();
        assert_eq!(claims.tenant_id.as_deref(), Some("acme"));
        assert_eq!(
            claims.tenant_permissions.as_deref(),
            Some(&["billing:write".to_string()][..])
        );
    }

    #[test]
    fn test_tampered_token_returns_none() {
        let issuer = TokenIssuer::new(&test_config(), Arc::new(SystemClock));
        let bundle = issuer.mint(&test_principal(), None).unwrap();

        let mut tampered = bundle.access_token.clone();
        tampered.push('x');
        assert!(issuer.verify(&tampered).is_none());
        assert!(issuer.verify("not-a-token").is_none());
    }

    #[test]
    fn test_expired_token_returns_none() {
        // Mint in the past; verification uses real time.
        let past = Utc::now() - chrono::Duration::hours(3);
        let issuer = TokenIssuer::new(&test_config(), Arc::new(ManualClock::new(past)));

        let bundle = issuer.mint(&test_principal(), None).unwrap();
        assert!(issuer.verify(&bundle.access_token).is_none());
    }

    #[test]
    fn test_refresh_token_uses_distinct_material() {
        let issuer = TokenIssuer::new(&test_config(), Arc::new(SystemClock));
        let bundle = issuer.mint(&test_principal(), None).unwrap();

        // A refresh token never validates as an access token and vice versa.
        assert!(issuer.verify(&bundle.refresh_token).is_none());
        assert!(issuer.verify_refresh(&bundle.access_token).is_err());

        let claims = issuer.verify_refresh(&bundle.refresh_token).unwrap();
        assert_eq!(claims.sid, bundle.session_id);
    }
}
