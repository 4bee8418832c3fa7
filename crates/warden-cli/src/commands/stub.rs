//! `stub add` / `stub list` / `stub check`.

use warden::error::WardenError;
use warden::stub::{self, ItemKind, SourceItem, StubAddOutcome};

use crate::context::CliContext;

/// Insert a stub marker for `function`, resolving its source file and
/// address from the configured splits map.
pub fn add(ctx: &CliContext, function: &str) -> Result<StubAddOutcome, WardenError> {
    stub::add_stub(&ctx.config.repo.root, function, &ctx.splits)
}

/// Every stub marker and function definition found in `source_file`, in the
/// order they appear.
pub fn list(ctx: &CliContext, source_file: &str) -> Result<Vec<SourceItem>, WardenError> {
    let path = ctx.source_full_path(std::path::Path::new(source_file));
    let content = std::fs::read_to_string(&path)?;
    Ok(stub::parse_items(&content, &ctx.splits))
}

/// Whether `function` already has a stub marker or definition in
/// `source_file`, and where.
pub fn check(
    ctx: &CliContext,
    source_file: &str,
    function: &str,
) -> Result<Option<(usize, ItemKind)>, WardenError> {
    let path = ctx.source_full_path(std::path::Path::new(source_file));
    let content = std::fs::read_to_string(&path)?;
    Ok(stub::find_existing(&content, function))
}
