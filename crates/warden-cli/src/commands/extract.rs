//! `extract list` / `extract files` / `extract get`.

use warden::error::WardenError;
use warden_core::model::{Function, FunctionName, FunctionStatus};
use warden_core::store::functions::FunctionPatch;

use crate::context::CliContext;

const ALL_STATUSES: [FunctionStatus; 8] = [
    FunctionStatus::Unclaimed,
    FunctionStatus::Claimed,
    FunctionStatus::InProgress,
    FunctionStatus::Matched,
    FunctionStatus::Committed,
    FunctionStatus::CommittedNeedsFix,
    FunctionStatus::InReview,
    FunctionStatus::Merged,
];

/// Every known function row, optionally narrowed to one status, newest
/// `updated_at` first.
pub fn list(ctx: &CliContext, status: Option<FunctionStatus>) -> Result<Vec<Function>, WardenError> {
    let statuses: Vec<FunctionStatus> = status.map_or_else(|| ALL_STATUSES.to_vec(), |s| vec![s]);
    let mut out = Vec::new();
    for s in statuses {
        out.extend(ctx.store.get_functions_by_status(s)?);
    }
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(out)
}

/// Every distinct source file any known function references.
pub fn files(ctx: &CliContext) -> Result<Vec<String>, WardenError> {
    let mut files: Vec<String> = list(ctx, None)?.into_iter().filter_map(|f| f.source_file).collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Resolve `name`, registering it if it has never been seen before; with
/// `create_scratch`, also run the full extract-get flow (context build,
/// scratch search-or-create, attach to the function row).
pub fn get(ctx: &mut CliContext, name: &str, create_scratch: bool) -> Result<Function, WardenError> {
    let fname = FunctionName::new(name)?;

    if create_scratch {
        ctx.driver().extract_get(name)?;
    } else if ctx.store.get_function(&fname)?.is_none() {
        let agent = ctx.agent.clone();
        ctx.store.upsert_function(&fname, FunctionPatch::default(), Some(&agent))?;
    }

    ctx.store
        .get_function(&fname)?
        .ok_or_else(|| WardenError::FunctionNotFound { name: name.to_owned() })
}
