//! Session lifecycle: cap-enforced creation, activity tracking, and
//! invalidation with an explicit retry contract.

pub mod manager;
pub mod retry;

pub use manager::SessionManager;
pub use retry::{with_retry, RetryPolicy};
