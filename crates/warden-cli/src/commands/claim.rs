//! `claim add` / `claim release` / `claim list`.

use warden::error::WardenError;
use warden_core::model::{Claim, FunctionName};

use crate::context::CliContext;

pub fn add(ctx: &mut CliContext, name: &str) -> Result<Claim, WardenError> {
    let fname = FunctionName::new(name)?;
    let ttl = ctx.config.repo.default_claim_ttl_secs;
    let agent = ctx.agent.clone();
    Ok(ctx.store.add_claim(&fname, &agent, ttl)?)
}

/// Release the claim on `name`. With `force`, releases whoever holds it
/// rather than only the invoking agent's own claim.
pub fn release(ctx: &mut CliContext, name: &str, force: bool) -> Result<bool, WardenError> {
    let fname = FunctionName::new(name)?;
    if force {
        Ok(ctx.store.release_claim(&fname, None)?)
    } else {
        let agent = ctx.agent.clone();
        Ok(ctx.store.release_claim(&fname, Some(&agent))?)
    }
}

pub fn list(ctx: &CliContext) -> Result<Vec<Claim>, WardenError> {
    Ok(ctx.store.get_active_claims()?)
}
