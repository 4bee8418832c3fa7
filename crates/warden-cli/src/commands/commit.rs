//! `commit apply`.

use warden::commit_apply::{CommitApplier, CommitOutcome, CommitRequest};
use warden::error::WardenError;
use warden_core::model::FunctionName;

use crate::context::CliContext;

/// Apply `new_code` as `name`'s implementation: replace the stub/definition,
/// verify it still compiles, and commit. With `dry_run`, stop after the
/// compile check and leave no trace. With `force`, commit even if the build
/// is broken, recording `diagnosis` against the function row.
pub fn apply(
    ctx: &mut CliContext,
    name: &str,
    new_code: &str,
    dry_run: bool,
    force: bool,
    diagnosis: Option<&str>,
) -> Result<CommitOutcome, WardenError> {
    let fname = FunctionName::new(name)?;
    let function =
        ctx.store.get_function(&fname)?.ok_or_else(|| WardenError::FunctionNotFound { name: name.to_owned() })?;
    let source_file = function
        .source_file
        .clone()
        .ok_or_else(|| WardenError::SourceFileNotFound { function: name.to_owned() })?;
    let worktree_path = function
        .worktree_path
        .clone()
        .unwrap_or_else(|| ctx.config.repo.root.display().to_string());
    let scratch_url = function
        .local_scratch_slug
        .as_ref()
        .map(|s| s.as_str().to_owned())
        .unwrap_or_default();

    let request = CommitRequest {
        function_name: name.to_owned(),
        source_file,
        new_code: new_code.to_owned(),
        match_percent: function.match_percent,
        scratch_url,
    };

    let applier = CommitApplier::new(
        std::path::PathBuf::from(worktree_path),
        ctx.config.repo.build_config_path.clone(),
        ctx.workflow_config.ninja_timeout,
        ctx.workflow_config.git_timeout,
        &ctx.store,
    );

    if force {
        let diagnosis = diagnosis
            .ok_or_else(|| WardenError::ConfigError {
                path: std::path::PathBuf::new(),
                detail: "--force requires --diagnosis".to_owned(),
            })?
            .to_owned();
        let (outcome, build_ok) = applier.apply_forced(&request)?;
        drop(applier);
        if !build_ok {
            let agent = ctx.agent.clone();
            ctx.store.upsert_function(
                &fname,
                warden_core::store::functions::FunctionPatch {
                    build_status: Some(warden_core::model::BuildStatus::Broken),
                    build_diagnosis: Some(Some(diagnosis)),
                    ..Default::default()
                },
                Some(&agent),
            )?;
        }
        Ok(outcome)
    } else {
        applier.apply(&request, dry_run)
    }
}
