//! `workflow finish`.

use warden::commit_apply::CommitOutcome;
use warden::error::WardenError;

use crate::context::CliContext;

/// Replace the function's source with `new_code`, verify it compiles, flip
/// the build-config annotation if warranted, and commit — the terminal step
/// of a function's journey through the workflow.
pub fn finish(
    ctx: &mut CliContext,
    name: &str,
    new_code: &str,
    force: bool,
    diagnosis: Option<&str>,
) -> Result<CommitOutcome, WardenError> {
    ctx.driver().workflow_finish(name, new_code, force, diagnosis)
}
