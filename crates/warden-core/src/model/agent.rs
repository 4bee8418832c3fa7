//! The `Agent` registry entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, BranchName};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub worktree_path: Option<String>,
    pub branch: Option<BranchName>,
    pub last_seen_at: DateTime<Utc>,
}
