//! The `Function` entity and its status/build/PR enumerations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, FunctionName, ScratchSlug};

/// A function's position in the lifecycle state machine (component C).
///
/// Stored status is advisory; [`crate::lifecycle::derive_status`] is the
/// source of truth and is the only writer of this field in practice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionStatus {
    Unclaimed,
    Claimed,
    InProgress,
    Matched,
    Committed,
    CommittedNeedsFix,
    InReview,
    Merged,
}

impl FunctionStatus {
    /// Returns `true` if the status is terminal (no further transitions).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged)
    }

    /// Parse the status from its snake_case storage representation.
    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "unclaimed" => Self::Unclaimed,
            "claimed" => Self::Claimed,
            "in_progress" => Self::InProgress,
            "matched" => Self::Matched,
            "committed" => Self::Committed,
            "committed_needs_fix" => Self::CommittedNeedsFix,
            "in_review" => Self::InReview,
            "merged" => Self::Merged,
            _ => return None,
        })
    }

    /// Render the status to its snake_case storage representation.
    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Matched => "matched",
            Self::Committed => "committed",
            Self::CommittedNeedsFix => "committed_needs_fix",
            Self::InReview => "in_review",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// The build-health of a function's last verify attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Unknown,
    Passing,
    Broken,
}

impl BuildStatus {
    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "unknown" => Self::Unknown,
            "passing" => Self::Passing,
            "broken" => Self::Broken,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Passing => "passing",
            Self::Broken => "broken",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// The state of a pull request tracking a committed function, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

impl PrState {
    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "open" => Self::Open,
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Merged => "merged",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// The unit of work: one decompilation target function.
///
/// Created lazily on first reference and never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: FunctionName,
    pub source_file: Option<String>,
    pub worktree_path: Option<String>,
    pub match_percent: f64,
    pub status: FunctionStatus,
    pub local_scratch_slug: Option<ScratchSlug>,
    pub production_scratch_slug: Option<ScratchSlug>,
    pub claimed_by_agent: Option<AgentId>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub build_status: BuildStatus,
    pub build_diagnosis: Option<String>,
    pub is_committed: bool,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_state: Option<PrState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    /// Construct a freshly-created row for a function seen for the first
    /// time: status `unclaimed`, `match_percent` 0.
    #[must_use]
    pub fn new(name: FunctionName, now: DateTime<Utc>) -> Self {
        Self {
            name,
            source_file: None,
            worktree_path: None,
            match_percent: 0.0,
            status: FunctionStatus::Unclaimed,
            local_scratch_slug: None,
            production_scratch_slug: None,
            claimed_by_agent: None,
            claimed_at: None,
            branch: None,
            commit_hash: None,
            build_status: BuildStatus::Unknown,
            build_diagnosis: None,
            is_committed: false,
            pr_url: None,
            pr_number: None,
            pr_state: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_db_str_roundtrip() {
        for s in [
            FunctionStatus::Unclaimed,
            FunctionStatus::Claimed,
            FunctionStatus::InProgress,
            FunctionStatus::Matched,
            FunctionStatus::Committed,
            FunctionStatus::CommittedNeedsFix,
            FunctionStatus::InReview,
            FunctionStatus::Merged,
        ] {
            assert_eq!(FunctionStatus::from_db_str(s.as_db_str()), Some(s));
        }
    }

    #[test]
    fn status_merged_is_terminal() {
        assert!(FunctionStatus::Merged.is_terminal());
        assert!(!FunctionStatus::Committed.is_terminal());
    }

    #[test]
    fn build_status_default_unknown() {
        assert_eq!(BuildStatus::default(), BuildStatus::Unknown);
    }

    #[test]
    fn new_function_is_unclaimed() {
        let now = Utc::now();
        let f = Function::new(FunctionName::new("Foo_80005940").unwrap(), now);
        assert_eq!(f.status, FunctionStatus::Unclaimed);
        assert!((f.match_percent - 0.0).abs() < f64::EPSILON);
        assert!(!f.is_committed);
    }
}
