//! Authentication and session security.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use manager::AuthManager;
pub use models::{
    DeviceInfo, LoginOutcome, LoginRequest, LoginSuccess, Principal, PrincipalId, PrincipalStatus,
    RiskLevel, Role, SecurityEvent, SecurityEventType, SecurityMetrics, SessionId, SessionRecord,
    TenantContext, TokenBundle, TwoFactorSetup,
};
