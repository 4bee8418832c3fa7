//! Audit & Query Layer (component G): read-only projections over the State
//! Store. Every method here runs against an already-open [`Store`] and never
//! mutates state or emits an audit entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{AgentId, BranchName, SubdirectoryKey};
use crate::store::Store;

/// Per-agent activity summary ("agent summary").
#[derive(Clone, Debug, Serialize)]
pub struct AgentSummary {
    pub agent_id: AgentId,
    pub active_claim_count: i64,
    pub subdirectories_held: Vec<SubdirectoryKey>,
    pub last_seen_at: DateTime<Utc>,
}

/// Lock-holder/progress view of one subdirectory ("subdirectory status").
#[derive(Clone, Debug, Serialize)]
pub struct SubdirectoryStatus {
    pub key: SubdirectoryKey,
    pub locked_by_agent: Option<AgentId>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub branch: Option<BranchName>,
    pub pending_commits_count: i64,
    pub is_expired: bool,
}

/// Broken-build count for one worktree ("broken-build counts per worktree").
#[derive(Clone, Debug, Serialize)]
pub struct BrokenBuildCount {
    pub worktree_path: String,
    pub count: i64,
}

/// Compute an [`AgentSummary`] for every agent known to the registry,
/// cross-referencing active claims and held subdirectory locks.
pub fn agent_summaries(store: &Store) -> Result<Vec<AgentSummary>> {
    let agents = store.list_agents()?;
    let active_claims = store.get_active_claims()?;
    let locks = store.list_subdirectory_locks()?;
    let now = Utc::now();

    let mut claim_counts: HashMap<String, i64> = HashMap::new();
    for claim in &active_claims {
        *claim_counts.entry(claim.agent_id.as_str().to_string()).or_insert(0) += 1;
    }

    let mut held: HashMap<String, Vec<SubdirectoryKey>> = HashMap::new();
    for lock in &locks {
        if !lock.is_expired(now) {
            held
                .entry(lock.locked_by_agent.as_str().to_string())
                .or_default()
                .push(lock.key.clone());
        }
    }

    Ok(agents
        .into_iter()
        .map(|a| {
            let id = a.agent_id.as_str().to_string();
            AgentSummary {
                active_claim_count: claim_counts.get(&id).copied().unwrap_or(0),
                subdirectories_held: held.get(&id).cloned().unwrap_or_default(),
                agent_id: a.agent_id,
                last_seen_at: a.last_seen_at,
            }
        })
        .collect())
}

/// Status of every known subdirectory lock, expired or not (callers decide
/// how to render an expired-but-present lock, e.g. "stale, takeover-able").
pub fn subdirectory_statuses(store: &Store) -> Result<Vec<SubdirectoryStatus>> {
    let now = Utc::now();
    Ok(store
        .list_subdirectory_locks()?
        .into_iter()
        .map(|lock| SubdirectoryStatus {
            is_expired: lock.is_expired(now),
            key: lock.key,
            locked_by_agent: Some(lock.locked_by_agent),
            lock_expires_at: Some(lock.lock_expires_at),
            branch: lock.branch,
            pending_commits_count: lock.pending_commits_count,
        })
        .collect())
}

/// Broken-build function counts, grouped by worktree path.
pub fn broken_build_counts_by_worktree(store: &Store) -> Result<Vec<BrokenBuildCount>> {
    let needs_fix = store.get_needs_fix()?;
    let mut counts: HashMap<String, i64> = HashMap::new();
    for f in needs_fix {
        if let Some(wt) = f.worktree_path {
            *counts.entry(wt).or_insert(0) += 1;
        }
    }
    let mut out: Vec<BrokenBuildCount> = counts
        .into_iter()
        .map(|(worktree_path, count)| BrokenBuildCount { worktree_path, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentId as Aid, FunctionName};
    use crate::store::functions::FunctionPatch;

    #[test]
    fn agent_summary_counts_active_claims() {
        let mut store = Store::open_in_memory().unwrap();
        let agent = Aid::new("claude1").unwrap();
        store.touch_agent(&agent, None, None).unwrap();
        store
            .add_claim(&FunctionName::new("Foo_1").unwrap(), &agent, 3600)
            .unwrap();
        let summaries = agent_summaries(&store).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].active_claim_count, 1);
    }

    #[test]
    fn broken_build_counts_group_by_worktree() {
        let mut store = Store::open_in_memory().unwrap();
        let name = FunctionName::new("Foo_1").unwrap();
        store
            .upsert_function(
                &name,
                FunctionPatch {
                    worktree_path: Some(Some("/wt/lb".into())),
                    is_committed: Some(true),
                    build_status: Some(crate::model::BuildStatus::Broken),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let counts = broken_build_counts_by_worktree(&store).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].worktree_path, "/wt/lb");
        assert_eq!(counts[0].count, 1);
    }
}
