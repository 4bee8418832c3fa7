//! `scratch create` / `compile` / `update` / `get` / `search` / `search-context`.

use warden::error::WardenError;
use warden::workflow::{ExtractGetOutcome, ScratchCompileOutcome};
use warden_core::model::FunctionName;
use warden_scratch::model::{ScratchUpdate, TerseScratch};

use crate::context::CliContext;

fn resolve_slug(ctx: &CliContext, name: &str) -> Result<String, WardenError> {
    let fname = FunctionName::new(name)?;
    let function =
        ctx.store.get_function(&fname)?.ok_or_else(|| WardenError::FunctionNotFound { name: name.to_owned() })?;
    function
        .local_scratch_slug
        .map(|s| s.as_str().to_owned())
        .ok_or_else(|| WardenError::NoScratchAvailable { function: name.to_owned() })
}

/// Find-or-create a scratch for `name`, the direct entry point for
/// attaching a scratch without going through `extract get`.
pub fn create(ctx: &mut CliContext, name: &str) -> Result<ExtractGetOutcome, WardenError> {
    ctx.driver().extract_get(name)
}

/// Push `source_code` (if given) to the function's scratch, compile it
/// remotely, and record the score against the function row.
pub fn compile(
    ctx: &mut CliContext,
    name: &str,
    source_code: Option<&str>,
) -> Result<ScratchCompileOutcome, WardenError> {
    ctx.driver().scratch_compile(name, source_code)
}

/// Overwrite a scratch's source code directly, without compiling.
pub fn update(ctx: &mut CliContext, name: &str, source_code: &str) -> Result<warden_scratch::model::Scratch, WardenError> {
    let slug = resolve_slug(ctx, name)?;
    Ok(ctx.scratch.update_scratch(
        &slug,
        &ScratchUpdate { source_code: Some(source_code.to_owned()), ..ScratchUpdate::default() },
    )?)
}

/// Fetch a function's scratch as it currently stands on the remote service.
pub fn get(ctx: &CliContext, name: &str) -> Result<warden_scratch::model::Scratch, WardenError> {
    let slug = resolve_slug(ctx, name)?;
    Ok(ctx.scratch.get_scratch(&slug)?)
}

/// Search the remote service's scratch listing.
pub fn search(
    ctx: &CliContext,
    query: Option<&str>,
    platform: Option<&str>,
    compiler: Option<&str>,
    page_size: u32,
) -> Result<Vec<TerseScratch>, WardenError> {
    Ok(ctx.scratch.search(query, platform, compiler, page_size)?)
}

/// Preview the stripped context a new scratch for `name` would be created
/// with, without creating or attaching anything.
pub fn search_context(ctx: &mut CliContext, name: &str) -> Result<String, WardenError> {
    ctx.driver().build_context_for(name)
}
