//! The `AuditEntry` append-only change log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::AgentId;

/// The kind of entity an audit entry describes a change to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Function,
    Claim,
    SubdirectoryLock,
    Scratch,
    BranchProgress,
    Agent,
}

impl EntityType {
    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Claim => "claim",
            Self::SubdirectoryLock => "subdirectory_lock",
            Self::Scratch => "scratch",
            Self::BranchProgress => "branch_progress",
            Self::Agent => "agent",
        }
    }

    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "function" => Self::Function,
            "claim" => Self::Claim,
            "subdirectory_lock" => Self::SubdirectoryLock,
            "scratch" => Self::Scratch,
            "branch_progress" => Self::BranchProgress,
            "agent" => Self::Agent,
            _ => return None,
        })
    }
}

/// The action an audit entry records. Not exhaustive by design — callers
/// pass any short verb; the store does not validate against a closed set so
/// that new action kinds don't require a migration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditAction(pub String);

impl AuditAction {
    pub const CREATED: &'static str = "created";
    pub const UPDATED: &'static str = "updated";
    pub const RELEASED: &'static str = "released";
    pub const LOCKED: &'static str = "locked";
    pub const UNLOCKED: &'static str = "unlocked";

    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub agent_id: Option<AgentId>,
    pub metadata: Option<Value>,
}
