//! `state status` / `state validate` / `state history` / `state agents` /
//! `state stale`.

use warden::error::WardenError;
use warden_core::lifecycle::{self, ValidationDivergence};
use warden_core::model::{Agent, EntityType, AuditEntry, Scratch};
use warden_core::query::{self, AgentSummary, BrokenBuildCount, SubdirectoryStatus};

use crate::context::CliContext;

/// Cross-referenced view of what every agent and subdirectory currently
/// holds, plus where broken builds are piling up.
#[derive(serde::Serialize)]
pub struct StatusReport {
    pub agents: Vec<AgentSummary>,
    pub subdirectories: Vec<SubdirectoryStatus>,
    pub broken_builds: Vec<BrokenBuildCount>,
}

pub fn status(ctx: &CliContext) -> Result<StatusReport, WardenError> {
    Ok(StatusReport {
        agents: query::agent_summaries(&ctx.store)?,
        subdirectories: query::subdirectory_statuses(&ctx.store)?,
        broken_builds: query::broken_build_counts_by_worktree(&ctx.store)?,
    })
}

/// Find every function row whose stored status disagrees with what the
/// lifecycle rules derive. With `fix`, also repair them.
pub fn validate(ctx: &mut CliContext, fix: bool) -> Result<Vec<ValidationDivergence>, WardenError> {
    let divergences = lifecycle::validate(&ctx.store)?;
    if fix {
        lifecycle::fix(&mut ctx.store, &divergences)?;
    }
    Ok(divergences)
}

/// The audit log, optionally narrowed to one entity type and/or entity id.
pub fn history(
    ctx: &CliContext,
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    limit: i64,
) -> Result<Vec<AuditEntry>, WardenError> {
    let entity_type = entity_type
        .map(|s| {
            EntityType::from_db_str(s).ok_or_else(|| WardenError::ConfigError {
                path: std::path::PathBuf::new(),
                detail: format!("unrecognized entity type `{s}`"),
            })
        })
        .transpose()?;
    Ok(ctx.store.get_history(entity_type, entity_id, limit)?)
}

pub fn agents(ctx: &CliContext) -> Result<Vec<Agent>, WardenError> {
    Ok(ctx.store.list_agents()?)
}

/// Scratches that haven't been verified in over a day.
pub fn stale(ctx: &CliContext) -> Result<Vec<Scratch>, WardenError> {
    Ok(ctx.store.get_stale_scratches(chrono::Duration::hours(24))?)
}
