//! Abuse controls: rate limiting, risk scoring and the TOTP second factor.

pub mod rate_limiter;
pub mod risk;
pub mod two_factor;

pub use rate_limiter::RateLimiter;
pub use risk::RiskAnalyzer;
pub use two_factor::{TwoFactorManager, TwoFactorVerification};
