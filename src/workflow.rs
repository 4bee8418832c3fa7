//! The Workflow Driver (component E): end-to-end orchestration of one
//! function's journey through extract-get, scratch-compile, and
//! workflow-finish.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use warden_core::model::{AgentId, EntityType, Function, FunctionName, ScratchSlug, SubdirectoryKey};
use warden_core::store::functions::FunctionPatch;
use warden_core::Store;
use warden_scratch::model::{
    CompilationResult, CompileRequest, ForkRequest, Scratch as WireScratch, ScratchCreate,
    ScratchUpdate, TerseScratch,
};
use warden_scratch::{ScratchClient, ScratchError};

use crate::commit_apply::{CommitApplier, CommitRequest};
use crate::error::WardenError;
use crate::splits::SplitsMap;

/// Threshold above which a function counts as "matched enough to commit"
/// without `--force` ("current match ≥ 95").
pub const FINISH_MATCH_THRESHOLD: f64 = 95.0;

/// The fixed pieces of repository layout and timing the Driver needs,
/// assembled by the CLI layer from [`crate::config::WardenConfig`].
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub worktree_path: PathBuf,
    pub build_config_path: PathBuf,
    pub ninja_timeout: Duration,
    pub git_timeout: Duration,
    pub claim_ttl_secs: i64,
    pub broken_build_threshold: u32,
    pub compiler: String,
    pub compiler_flags: String,
    pub platform: String,
    /// When set, a newly created scratch with no known source is sent
    /// through the remote decompiler before being handed to the agent,
    /// per §4.4/§4.5/§9's decompile-via-m2c path. Off by default since
    /// decompiler availability is an external-service configuration
    /// detail this system doesn't control.
    pub decompile_on_create: bool,
    /// `-I` directories passed to the system preprocessor when building
    /// the decompiler-only context (§4.4 "Preprocessor handling").
    pub preprocessor_include_dirs: Vec<PathBuf>,
}

pub struct WorkflowDriver<'a> {
    pub store: &'a mut Store,
    pub scratch: &'a mut ScratchClient,
    pub splits: &'a dyn SplitsMap,
    pub agent: AgentId,
    pub config: WorkflowConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtractGetOutcome {
    pub scratch_slug: String,
    pub source_file: String,
    pub context: String,
    pub created: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScratchCompileOutcome {
    pub score: i64,
    pub max_score: i64,
    pub match_percent: f64,
    pub compiler_output: String,
}

impl<'a> WorkflowDriver<'a> {
    /// Find-or-create a scratch for `function_name` and record it against
    /// the function row ("extract-get").
    pub fn extract_get(&mut self, function_name: &str) -> Result<ExtractGetOutcome, WardenError> {
        let name = FunctionName::new(function_name)?;

        let source_file = self
            .splits
            .source_file_for(function_name)
            .ok_or_else(|| WardenError::SourceFileNotFound { function: function_name.to_owned() })?;

        let raw_context = self.rebuild_context_header(&source_file)?;
        let context = warden_context::build_context(&raw_context, function_name)?;

        let candidates = self.scratch.search(Some(function_name), None, None, 25)?;
        let best = self.pick_best_candidate(&candidates);

        let (scratch, created) = if let Some(slug) = best {
            let forked = self.scratch.fork(&slug, &ForkRequest::default())?;
            self.scratch.claim_scratch(&forked.slug)?;
            let updated = self.scratch.update_scratch(
                &forked.slug,
                &ScratchUpdate { context: Some(context.clone()), ..ScratchUpdate::default() },
            )?;
            (updated, false)
        } else {
            let target_asm = self.read_target_assembly(function_name)?;
            let created = self.scratch.create_scratch(&ScratchCreate {
                name: Some(function_name.to_owned()),
                compiler: self.config.compiler.clone(),
                platform: Some(self.config.platform.clone()),
                compiler_flags: self.config.compiler_flags.clone(),
                target_asm,
                context: context.clone(),
                diff_label: function_name.to_owned(),
                ..ScratchCreate::default()
            })?;
            let created = if self.config.decompile_on_create {
                self.decompile_into_scratch(created, &context)?
            } else {
                created
            };
            (created, true)
        };

        self.upsert_from_wire_scratch(&name, &scratch)?;

        Ok(ExtractGetOutcome {
            scratch_slug: scratch.slug,
            source_file,
            context,
            created,
        })
    }

    /// Build (but do not persist or attach to any scratch) the stripped
    /// context for `function_name`, the read-only half of `extract_get`
    /// used by `scratch search-context` to preview what a new scratch's
    /// context would look like before committing to creating one.
    pub fn build_context_for(&self, function_name: &str) -> Result<String, WardenError> {
        let source_file = self
            .splits
            .source_file_for(function_name)
            .ok_or_else(|| WardenError::SourceFileNotFound { function: function_name.to_owned() })?;
        let raw_context = self.rebuild_context_header(&source_file)?;
        Ok(warden_context::build_context(&raw_context, function_name)?)
    }

    /// Update a scratch's source (if given), compile it remotely, and
    /// record the resulting score ("scratch-compile").
    pub fn scratch_compile(
        &mut self,
        function_name: &str,
        source_code: Option<&str>,
    ) -> Result<ScratchCompileOutcome, WardenError> {
        let name = FunctionName::new(function_name)?;
        let function = self
            .store
            .get_function(&name)?
            .ok_or_else(|| WardenError::FunctionNotFound { name: function_name.to_owned() })?;
        let slug = function
            .local_scratch_slug
            .clone()
            .ok_or_else(|| WardenError::NoScratchAvailable { function: function_name.to_owned() })?;

        if let Some(code) = source_code {
            self.scratch.update_scratch(
                slug.as_str(),
                &ScratchUpdate { source_code: Some(code.to_owned()), ..ScratchUpdate::default() },
            )?;
        }

        let result: CompilationResult = self.scratch.compile(slug.as_str(), None::<&CompileRequest>, true)?;
        let score = result.score();
        let max_score = result.max_score();
        let match_percent = warden_scratch::score_to_match_percent(score, max_score);

        self.store.record_match_score(&slug, score, max_score, Some(self.agent.as_str()))?;

        let mut patch = FunctionPatch::default();
        patch.match_percent = Some(match_percent);
        self.store.upsert_function(&name, patch, Some(&self.agent))?;

        Ok(ScratchCompileOutcome {
            score,
            max_score,
            match_percent,
            compiler_output: result.compiler_output,
        })
    }

    /// The commit path: verify preconditions, run the Commit Applier, and
    /// reflect the result onto the function and subdirectory-lock rows
    /// ("workflow-finish").
    pub fn workflow_finish(
        &mut self,
        function_name: &str,
        new_code: &str,
        force: bool,
        diagnosis: Option<&str>,
    ) -> Result<crate::commit_apply::CommitOutcome, WardenError> {
        let name = FunctionName::new(function_name)?;
        let function = self
            .store
            .get_function(&name)?
            .ok_or_else(|| WardenError::FunctionNotFound { name: function_name.to_owned() })?;

        if force && diagnosis.is_none() {
            return Err(WardenError::ConfigError {
                path: PathBuf::new(),
                detail: "--force requires --diagnosis".to_owned(),
            });
        }

        check_finish_preconditions(&function, &self.agent, force)?;

        let source_file = function
            .source_file
            .clone()
            .ok_or_else(|| WardenError::SourceFileNotFound { function: function_name.to_owned() })?;
        let worktree_path = function
            .worktree_path
            .clone()
            .unwrap_or_else(|| self.config.worktree_path.display().to_string());

        let broken_count = self.store.count_broken_builds_in_worktree(&worktree_path)?;
        if !force && broken_count >= i64::from(self.config.broken_build_threshold) {
            return Err(WardenError::BrokenBuildThresholdExceeded {
                worktree: worktree_path,
                count: broken_count,
                threshold: self.config.broken_build_threshold,
            });
        }

        let scratch_url = function
            .local_scratch_slug
            .as_ref()
            .map(|s| format!("scratch/{s}"))
            .unwrap_or_default();

        let applier = CommitApplier::new(
            PathBuf::from(worktree_path.clone()),
            self.config.build_config_path.clone(),
            self.config.ninja_timeout,
            self.config.git_timeout,
            &*self.store,
        );

        let request = CommitRequest {
            function_name: function_name.to_owned(),
            source_file: source_file.clone(),
            new_code: new_code.to_owned(),
            match_percent: function.match_percent,
            scratch_url,
        };

        let (outcome, build_ok) = if force {
            applier.apply_forced(&request)?
        } else {
            applier.apply(&request, true)?;
            (applier.apply(&request, false)?, true)
        };

        let mut patch = FunctionPatch::default();
        patch.is_committed = Some(true);
        patch.commit_hash = Some(outcome.commit_hash.clone());
        patch.build_status =
            Some(if build_ok { warden_core::model::BuildStatus::Passing } else { warden_core::model::BuildStatus::Broken });
        if let Some(diag) = diagnosis {
            patch.build_diagnosis = Some(Some(diag.to_owned()));
        }
        self.store.upsert_function(&name, patch, Some(&self.agent))?;

        let subdir_key = SubdirectoryKey::new(subdirectory_key_for_source_file(&source_file))?;
        self.store.increment_pending_commits(&subdir_key)?;

        self.store.release_claim(&name, Some(&self.agent))?;

        Ok(outcome)
    }

    fn rebuild_context_header(&self, source_file: &str) -> Result<String, WardenError> {
        let ctx_path = ctx_path_for(source_file);
        let output = crate::exec::run(
            "ninja",
            &[&ctx_path],
            &self.config.worktree_path,
            self.config.ninja_timeout,
        )?;
        if !output.success() {
            return Err(WardenError::BuildFailed { object: ctx_path, diagnostics: output.stderr });
        }
        Ok(std::fs::read_to_string(self.config.worktree_path.join(&ctx_path))?)
    }

    fn read_target_assembly(&self, function_name: &str) -> Result<String, WardenError> {
        let asm_path = self.config.worktree_path.join("asm").join(format!("{function_name}.s"));
        std::fs::read_to_string(&asm_path).map_err(|_| WardenError::SourceFileNotFound {
            function: function_name.to_owned(),
        })
    }

    /// Run a freshly created, still-empty scratch through the remote
    /// decompiler (§4.4/§4.5/§9's decompile-via-m2c path). The decompile
    /// call itself uses a preprocessed form of `context` (includes/macros
    /// expanded, `_Static_assert` stripped, since the decompiler can't
    /// parse either); the scratch's own `context` field, already set to
    /// the original unpreprocessed form by the caller, is left untouched —
    /// the target compiler dislikes preprocessor-synthesized constructs
    /// like `__attribute__((noreturn))`. A missing decompile endpoint
    /// (404/501) is non-fatal: per the Open Question on decompiler
    /// availability, the scratch proceeds with an empty initial source.
    fn decompile_into_scratch(
        &self,
        created: WireScratch,
        context: &str,
    ) -> Result<WireScratch, WardenError> {
        let preprocessed = match warden_context::preprocess(context, &self.preprocessor_include_dirs()) {
            Ok(pre) => warden_context::strip_static_asserts(&pre),
            Err(err) => {
                tracing::warn!("preprocessor pass failed, decompiling against raw context: {err}");
                context.to_owned()
            }
        };

        match self.scratch.decompile(&created.slug, Some(&preprocessed), Some(&self.config.compiler)) {
            Ok(result) => Ok(self.scratch.update_scratch(
                &created.slug,
                &ScratchUpdate { source_code: Some(result.decompilation), ..ScratchUpdate::default() },
            )?),
            Err(ScratchError::Api { status: 404 | 501, .. }) => {
                tracing::info!("no decompiler available for {}, starting from empty source", created.slug);
                Ok(created)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn preprocessor_include_dirs(&self) -> Vec<&Path> {
        self.config.preprocessor_include_dirs.iter().map(PathBuf::as_path).collect()
    }

    /// Among a search's candidates, the one with the highest match percent.
    fn pick_best_candidate(&self, candidates: &[TerseScratch]) -> Option<String> {
        candidates
            .iter()
            .max_by(|a, b| {
                let pa = warden_scratch::score_to_match_percent(a.score, a.max_score);
                let pb = warden_scratch::score_to_match_percent(b.score, b.max_score);
                pa.total_cmp(&pb)
            })
            .map(|s| s.slug.clone())
    }

    fn upsert_from_wire_scratch(&mut self, name: &FunctionName, scratch: &WireScratch) -> Result<(), WardenError> {
        let slug = ScratchSlug::new(scratch.slug.clone())?;
        let match_percent = scratch.match_percent();

        let core_scratch = warden_core::model::Scratch {
            slug: slug.clone(),
            instance: warden_core::model::ScratchInstance::Local,
            base_url: String::new(),
            function_name: name.clone(),
            score: scratch.score,
            max_score: scratch.max_score,
            match_percent,
            claim_token: scratch.claim_token.clone(),
            verified_at: None,
            created_at: chrono::Utc::now(),
        };
        self.store.upsert_scratch(&core_scratch, Some(self.agent.as_str()))?;

        let mut patch = FunctionPatch::default();
        patch.local_scratch_slug = Some(Some(slug));
        patch.match_percent = Some(match_percent);
        self.store.upsert_function(name, patch, Some(&self.agent))?;
        self.store.log_audit(
            EntityType::Function,
            name.as_str(),
            "updated",
            None,
            None,
            Some(&self.agent),
            Some(&serde_json::json!({"reason": "extract-get"})),
        )?;
        Ok(())
    }
}

/// The conventional aggregate-context-header path the external build
/// produces for a source file, per "ninja <ctx-path>" contract.
fn ctx_path_for(source_file: &str) -> String {
    let with_ext = source_file.strip_suffix(".c").unwrap_or(source_file);
    format!("build/GALE01/src/{with_ext}.ctx.h")
}

/// Derive a worktree subdirectory-lock key from a source file path, per the
/// scheme §3's examples illustrate ("lb", "ft-chara-ftFox"): drop the
/// top-level project directory and the filename, join what's left with `-`.
fn subdirectory_key_for_source_file(source_file: &str) -> String {
    let mut components: Vec<&str> = source_file.split('/').collect();
    if !components.is_empty() {
        components.remove(0);
    }
    components.pop();
    if components.is_empty() {
        "root".to_owned()
    } else {
        components.join("-")
    }
}

/// "workflow-finish" preconditions, checked in order: claimed by the
/// invoking agent, then (unless `force`) match ≥ 95.
fn check_finish_preconditions(function: &Function, agent: &AgentId, force: bool) -> Result<(), WardenError> {
    match &function.claimed_by_agent {
        Some(holder) if holder == agent => {}
        _ => {
            return Err(WardenError::NotClaimedByAgent {
                function: function.name.to_string(),
                agent: agent.to_string(),
            });
        }
    }

    if !force && function.match_percent < FINISH_MATCH_THRESHOLD {
        return Err(WardenError::NotFullyMatched {
            function: function.name.to_string(),
            match_percent: function.match_percent,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn function_with(agent: Option<&str>, match_percent: f64) -> Function {
        let mut f = Function::new(FunctionName::new("Foo_80001000").unwrap(), Utc::now());
        f.claimed_by_agent = agent.map(|a| AgentId::new(a).unwrap());
        f.match_percent = match_percent;
        f
    }

    #[test]
    fn preconditions_reject_unclaimed_function() {
        let f = function_with(None, 100.0);
        let agent = AgentId::new("claude1").unwrap();
        let err = check_finish_preconditions(&f, &agent, false).unwrap_err();
        assert!(matches!(err, WardenError::NotClaimedByAgent { .. }));
    }

    #[test]
    fn preconditions_reject_wrong_claimant() {
        let f = function_with(Some("claude2"), 100.0);
        let agent = AgentId::new("claude1").unwrap();
        let err = check_finish_preconditions(&f, &agent, false).unwrap_err();
        assert!(matches!(err, WardenError::NotClaimedByAgent { .. }));
    }

    #[test]
    fn preconditions_reject_low_match_without_force() {
        let f = function_with(Some("claude1"), 80.0);
        let agent = AgentId::new("claude1").unwrap();
        let err = check_finish_preconditions(&f, &agent, false).unwrap_err();
        assert!(matches!(err, WardenError::NotFullyMatched { .. }));
    }

    #[test]
    fn preconditions_allow_low_match_with_force() {
        let f = function_with(Some("claude1"), 10.0);
        let agent = AgentId::new("claude1").unwrap();
        assert!(check_finish_preconditions(&f, &agent, true).is_ok());
    }

    #[test]
    fn preconditions_pass_when_claimed_and_matched() {
        let f = function_with(Some("claude1"), 96.0);
        let agent = AgentId::new("claude1").unwrap();
        assert!(check_finish_preconditions(&f, &agent, false).is_ok());
    }

    #[test]
    fn ctx_path_uses_build_convention() {
        assert_eq!(ctx_path_for("melee/lb/lbcommand.c"), "build/GALE01/src/melee/lb/lbcommand.ctx.h");
    }

    #[test]
    fn subdirectory_key_drops_top_level_dir_and_filename() {
        assert_eq!(subdirectory_key_for_source_file("melee/lb/lbcommand.c"), "lb");
        assert_eq!(
            subdirectory_key_for_source_file("melee/ft/chara/ftFox/ftfox.c"),
            "ft-chara-ftFox"
        );
    }
}
