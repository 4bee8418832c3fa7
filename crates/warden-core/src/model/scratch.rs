//! The `Scratch` and `MatchHistory` entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, FunctionName, ScratchSlug};

/// Which deployment of the scratch service a scratch lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchInstance {
    Local,
    Production,
}

impl ScratchInstance {
    #[must_use]
    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "local" => Self::Local,
            "production" => Self::Production,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Production => "production",
        }
    }
}

/// A record of a remote compile sandbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scratch {
    pub slug: ScratchSlug,
    pub instance: ScratchInstance,
    pub base_url: String,
    pub function_name: FunctionName,
    pub score: i64,
    pub max_score: i64,
    pub match_percent: f64,
    pub claim_token: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Scratch {
    /// Match percent: `(max_score - score) / max_score` when `max_score > 0`
    /// and `score >= 0`, else 0. A negative score is the remote compile's
    /// failure sentinel, not a better-than-perfect diff, so it maps to the
    /// worst match percent rather than being clamped up to 100.
    #[must_use]
    pub fn compute_match_percent(score: i64, max_score: i64) -> f64 {
        if max_score > 0 && score >= 0 {
            let pct = (max_score - score) as f64 / max_score as f64 * 100.0;
            pct.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// One observed score for a scratch, appended to its history.
///
/// Consecutive duplicate scores for the same scratch are suppressed at the
/// store layer before insertion, not here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchHistoryEntry {
    pub scratch_slug: ScratchSlug,
    pub timestamp: DateTime<Utc>,
    pub score: i64,
    pub max_score: i64,
    pub match_percent: f64,
}

/// Per-branch best observed result for a function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchProgress {
    pub function_name: FunctionName,
    pub branch: String,
    pub match_percent: f64,
    pub scratch_slug: Option<ScratchSlug>,
    pub is_committed: bool,
    pub commit_hash: Option<String>,
    pub agent_id: Option<AgentId>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_percent_zero_score_is_full_match() {
        assert!((Scratch::compute_match_percent(0, 120) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn match_percent_zero_max_score_is_zero() {
        assert!((Scratch::compute_match_percent(-1, 0) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn match_percent_partial() {
        // score 30 of max 120 -> 90/120 = 75%
        assert!((Scratch::compute_match_percent(30, 120) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn match_percent_negative_score_is_zero() {
        // a failed remote compile (score < 0) is the worst case, not a
        // better-than-perfect one.
        assert!((Scratch::compute_match_percent(-50, 120) - 0.0).abs() < f64::EPSILON);
    }
}
