//! Login risk scoring from the recent audit trail.

use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use crate::auth::models::{PrincipalId, RiskLevel, SecurityEventType};
use crate::clock::Clock;
use crate::store::{EventStore, StoreResult};

const LOOKBACK_HOURS: i64 = 24;
const RECENT_LOGIN_SAMPLE: usize = 10;
const DISTINCT_IP_HIGH: usize = 5;
const DISTINCT_UA_MEDIUM: usize = 3;
const ATTEMPT_VOLUME_MEDIUM: u64 = 10;

/// Scores a successful login against the principal's trailing activity.
///
/// Signals are deliberately coarse: the score gates nothing, it is
/// attached to the login result and the audit event so downstream
/// consumers can step up verification on their own terms.
#[derive(Clone)]
pub struct RiskAnalyzer {
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl RiskAnalyzer {
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { events, clock }
    }

    /// Assess the risk of a login happening now.
    ///
    /// Looks at the last [`RECENT_LOGIN_SAMPLE`] successful logins and the
    /// total attempt volume in the trailing 24 hours; the strongest signal
    /// wins.
    pub async fn assess(&self, principal_id: PrincipalId) -> StoreResult<RiskLevel> {
        let now = self.clock.now();
        let since = now - Duration::hours(LOOKBACK_HOURS);

        let recent = self
            .events
            .recent_by_type(
                principal_id,
                SecurityEventType::Login,
                since,
                RECENT_LOGIN_SAMPLE,
            )
            .await?;

        let mut level = RiskLevel::Low;

        let distinct_ips: HashSet<&str> = recent
            .iter()
            .filter_map(|e| e.ip.as_deref())
            .collect();
        if distinct_ips.len() > DISTINCT_IP_HIGH {
            level = level.max(RiskLevel::High);
        }

        let distinct_agents: HashSet<&str> = recent
            .iter()
            .filter_map(|e| e.user_agent.as_deref())
            .collect();
        if distinct_agents.len() > DISTINCT_UA_MEDIUM {
            level = level.max(RiskLevel::Medium);
        }

        let logins = self
            .events
            .count_by_type_since(Some(principal_id), SecurityEventType::Login, since)
            .await?;
        let failures = self
            .events
            .count_by_type_since(Some(principal_id), SecurityEventType::FailedLogin, since)
            .await?;
        if logins + failures > ATTEMPT_VOLUME_MEDIUM {
            level = level.max(RiskLevel::Medium);
        }

        if level > RiskLevel::Low {
            log::info!("login risk for principal {principal_id} assessed {level}");
        }
        Ok(level)
    }
}
