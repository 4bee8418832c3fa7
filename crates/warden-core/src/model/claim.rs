//! The `Claim` entity — an active exclusive reservation on a function.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, FunctionName};

/// Default claim/lock time-to-live, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub function_name: FunctionName,
    pub agent_id: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
