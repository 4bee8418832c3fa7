//! `worktree list` / `worktree lock` / `worktree unlock` / `worktree status`.

use warden::error::WardenError;
use warden::worktree::{self, WorktreeEntry};
use warden_core::model::{BranchName, SubdirectoryKey, SubdirectoryLock};
use warden_core::query::{self, SubdirectoryStatus};

use crate::context::CliContext;

pub fn list(ctx: &CliContext) -> Result<Vec<WorktreeEntry>, WardenError> {
    worktree::list(&ctx.config.repo.root)
}

/// Acquire (or renew) the lock on `key`. `worktree_path` and `branch`
/// default to the repository root and no branch when not given.
pub fn lock(
    ctx: &mut CliContext,
    key: &str,
    worktree_path: Option<&str>,
    branch: Option<&str>,
) -> Result<SubdirectoryLock, WardenError> {
    let key = SubdirectoryKey::new(key)?;
    let branch = branch.map(BranchName::new).transpose()?;
    let path = worktree_path.map_or_else(|| ctx.config.repo.root.display().to_string(), str::to_owned);
    let ttl = ctx.config.repo.default_claim_ttl_secs;
    let agent = ctx.agent.clone();
    Ok(ctx.store.lock_subdirectory(&key, &path, branch.as_ref(), &agent, ttl)?)
}

/// Release the lock on `key`. With `force`, releases whoever holds it.
pub fn unlock(ctx: &mut CliContext, key: &str, force: bool) -> Result<bool, WardenError> {
    let key = SubdirectoryKey::new(key)?;
    if force {
        Ok(ctx.store.unlock_subdirectory(&key, None)?)
    } else {
        let agent = ctx.agent.clone();
        Ok(ctx.store.unlock_subdirectory(&key, Some(&agent))?)
    }
}

pub fn status(ctx: &CliContext) -> Result<Vec<SubdirectoryStatus>, WardenError> {
    query::subdirectory_statuses(&ctx.store)
}
