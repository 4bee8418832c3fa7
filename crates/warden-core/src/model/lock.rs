//! The `SubdirectoryLock` entity — an exclusive reservation over a worktree subtree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::DEFAULT_TTL_SECS;
use super::ids::{AgentId, BranchName, SubdirectoryKey};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubdirectoryLock {
    pub key: SubdirectoryKey,
    pub worktree_path: String,
    pub branch: Option<BranchName>,
    pub locked_by_agent: AgentId,
    pub locked_at: DateTime<Utc>,
    pub lock_expires_at: DateTime<Utc>,
    pub pending_commits_count: i64,
    pub last_commit_at: Option<DateTime<Utc>>,
}

impl SubdirectoryLock {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lock_expires_at
    }
}

/// Default lock TTL matches the claim default (reuses the claim protocol).
pub const DEFAULT_LOCK_TTL_SECS: i64 = DEFAULT_TTL_SECS;
