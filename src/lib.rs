//! # Gatekeeper
//!
//! An authentication and session security subsystem: credential
//! verification, TOTP second factor with backup codes, session lifecycle
//! with a per-principal cap, signed access/refresh tokens, sliding-window
//! rate limiting, login risk scoring, and retry-safe session invalidation.
//!
//! The subsystem is an explicit dependency graph rather than a set of
//! globals: the process builds one [`AuthManager`] from a validated
//! [`AuthConfig`], a bundle of store handles, a notification sender and a
//! clock, then shares it by reference across request handlers. Every
//! collaborator sits behind a trait, so tests run the whole stack against
//! [`MemoryStore`](store::MemoryStore) and a manual clock.
//!
//! ## Core Modules
//!
//! - [`auth`]: Orchestration, data models, and the error taxonomy
//! - [`session`]: Session cap enforcement and retried invalidation
//! - [`security`]: Rate limiting, risk scoring, and the second factor
//! - [`token`]: Signed access/refresh token issuance and validation
//! - [`store`]: Store traits with in-memory and Postgres backends
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use gatekeeper::{AuthConfig, AuthManager};
//! use gatekeeper::clock::SystemClock;
//! use gatekeeper::notify::NullSender;
//! use gatekeeper::store::{MemoryStore, StoreHandles};
//!
//! let config = AuthConfig::with_secrets(
//!     "access-secret-0123456789-0123456789",
//!     "refresh-secret-0123456789-0123456789",
//!     "pepper-0123456789",
//! );
//! let stores = StoreHandles::from_single(Arc::new(MemoryStore::new()));
//! let auth = AuthManager::new(config, stores, Arc::new(NullSender), Arc::new(SystemClock));
//! ```

/// Orchestration, data models, and the error taxonomy.
pub mod auth;
pub use auth::{
    AuthError, AuthManager, AuthResult, DeviceInfo, LoginOutcome, LoginRequest, LoginSuccess,
    Principal, PrincipalId, PrincipalStatus, RiskLevel, Role, SecurityEvent, SecurityEventType,
    SecurityMetrics, SessionId, SessionRecord, TenantContext, TokenBundle, TwoFactorSetup,
};

/// Injectable time source.
pub mod clock;

/// Environment-driven policy configuration.
pub mod config;
pub use config::{AuthConfig, ConfigError};

/// Notification delivery seam.
pub mod notify;

/// Rate limiting, risk scoring, and the TOTP second factor.
pub mod security;
pub use security::{RateLimiter, RiskAnalyzer, TwoFactorManager, TwoFactorVerification};

/// Session lifecycle and retried invalidation.
pub mod session;
pub use session::{RetryPolicy, SessionManager};

/// Store traits and backends.
pub mod store;

/// Signed token issuance and validation.
pub mod token;
pub use token::{AccessClaims, RefreshClaims, TokenIssuer};
