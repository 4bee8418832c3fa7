//! The Commit Applier (component F): replaces a function's stub marker or
//! existing definition with new code, verifies the result compiles, reverts
//! on failure, optionally flips the file's build-config matching status, and
//! creates the git commit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use warden_core::buildconfig;
use warden_core::Store;

use crate::error::WardenError;
use crate::{exec, stub, worktree};

/// One commit-applier invocation's inputs.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub function_name: String,
    /// Path to the source file, relative to `worktree_path`.
    pub source_file: String,
    pub new_code: String,
    pub match_percent: f64,
    pub scratch_url: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CommitOutcome {
    pub commit_hash: Option<String>,
    pub build_config_flipped: bool,
    pub files_changed: Vec<PathBuf>,
}

pub struct CommitApplier<'a> {
    pub worktree_path: PathBuf,
    /// Path to the build config file, relative to `worktree_path`.
    pub build_config_path: PathBuf,
    pub ninja_timeout: Duration,
    pub git_timeout: Duration,
    pub store: &'a Store,
}

impl<'a> CommitApplier<'a> {
    #[must_use]
    pub fn new(
        worktree_path: PathBuf,
        build_config_path: PathBuf,
        ninja_timeout: Duration,
        git_timeout: Duration,
        store: &'a Store,
    ) -> Self {
        Self { worktree_path, build_config_path, ninja_timeout, git_timeout, store }
    }

    /// Run the full apply sequence. `dry_run` stops after the compile-verify
    /// step (used by `workflow finish`'s precondition check) without
    /// touching the build config or creating a commit; the source edit is
    /// still reverted in that case so a dry run leaves no trace.
    pub fn apply(&self, request: &CommitRequest, dry_run: bool) -> Result<CommitOutcome, WardenError> {
        let full_path = self.worktree_path.join(&request.source_file);
        let original = std::fs::read_to_string(&full_path)?;

        let updated = stub::replace_function(&original, &request.function_name, &request.new_code)?;
        std::fs::write(&full_path, &updated)?;

        if let Err(err) = self.verify_compiles(&request.source_file) {
            worktree::revert_path(&self.worktree_path, Path::new(&request.source_file))?;
            return Err(err);
        }

        if dry_run {
            worktree::revert_path(&self.worktree_path, Path::new(&request.source_file))?;
            return Ok(CommitOutcome::default());
        }

        let mut files_changed = vec![PathBuf::from(&request.source_file)];
        let build_config_flipped = self.maybe_flip_build_config(&request.source_file)?;
        if build_config_flipped {
            files_changed.push(self.build_config_path.clone());
        }

        let _ = worktree::clang_format(&self.worktree_path, self.git_timeout);

        let message = commit_message(&request.function_name, request.match_percent, &request.scratch_url);
        let committed = worktree::commit_paths(&self.worktree_path, &files_changed, &message)?;
        let commit_hash =
            if committed { Some(worktree::head_hash(&self.worktree_path)?) } else { None };

        Ok(CommitOutcome { commit_hash, build_config_flipped, files_changed })
    }

    /// Like [`Self::apply`], but a failed compile does not abort the commit:
    /// the edit is kept, the build config is left untouched, and the caller
    /// is told the build is broken so it can record that on the function row
    /// (used by `workflow finish --force --diagnosis`).
    pub fn apply_forced(&self, request: &CommitRequest) -> Result<(CommitOutcome, bool), WardenError> {
        let full_path = self.worktree_path.join(&request.source_file);
        let original = std::fs::read_to_string(&full_path)?;

        let updated = stub::replace_function(&original, &request.function_name, &request.new_code)?;
        std::fs::write(&full_path, &updated)?;

        let build_ok = self.verify_compiles(&request.source_file).is_ok();

        let mut files_changed = vec![PathBuf::from(&request.source_file)];
        let build_config_flipped = if build_ok { self.maybe_flip_build_config(&request.source_file)? } else { false };
        if build_config_flipped {
            files_changed.push(self.build_config_path.clone());
        }

        let _ = worktree::clang_format(&self.worktree_path, self.git_timeout);

        let message = commit_message(&request.function_name, request.match_percent, &request.scratch_url);
        let committed = worktree::commit_paths(&self.worktree_path, &files_changed, &message)?;
        let commit_hash = if committed { Some(worktree::head_hash(&self.worktree_path)?) } else { None };

        Ok((CommitOutcome { commit_hash, build_config_flipped, files_changed }, build_ok))
    }

    fn verify_compiles(&self, source_file: &str) -> Result<(), WardenError> {
        let object_path = object_path_for(source_file);
        let output = exec::run("ninja", &[&object_path], &self.worktree_path, self.ninja_timeout)?;
        if output.success() {
            return Ok(());
        }
        Err(WardenError::BuildFailed {
            object: object_path,
            diagnostics: extract_diagnostics(&output.stderr, &output.stdout),
        })
    }

    /// Flip `source_file`'s build-config entry to `Matching` if every
    /// function recorded against it is a complete match. Returns whether a
    /// flip was made; a file with no known functions, or already marked
    /// `Matching`, is left untouched (not an error).
    fn maybe_flip_build_config(&self, source_file: &str) -> Result<bool, WardenError> {
        let functions = self.store.get_functions_by_source_file(source_file)?;
        if functions.is_empty() {
            return Ok(false);
        }
        if !buildconfig::unmatched_blockers(&functions).is_empty() {
            return Ok(false);
        }

        let config_full_path = self.worktree_path.join(&self.build_config_path);
        let content = std::fs::read_to_string(&config_full_path)?;
        match buildconfig::find_state(&content, source_file) {
            Some(buildconfig::AnnotationState::Matching) | None => Ok(false),
            Some(buildconfig::AnnotationState::NonMatching) => {
                let new_content = buildconfig::flip_to_matching(&content, source_file)?;
                std::fs::write(&config_full_path, new_content)?;
                Ok(true)
            }
        }
    }
}

/// The conventional build object path for a source file ("ninja
/// <obj-path> to verify a single object compiles").
fn object_path_for(source_file: &str) -> String {
    let obj = if let Some(stripped) = source_file.strip_suffix(".c") {
        format!("{stripped}.o")
    } else {
        format!("{source_file}.o")
    };
    format!("build/GALE01/src/{obj}")
}

/// "stage changed files, commit with a message `Match <FunctionName>
/// (<pct>%)\n\nScratch: <url>`".
fn commit_message(function_name: &str, match_percent: f64, scratch_url: &str) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let pct = if (match_percent - match_percent.trunc()).abs() < f64::EPSILON {
        format!("{}%", match_percent as i64)
    } else {
        format!("{match_percent:.1}%")
    };
    format!("Match {function_name} ({pct})\n\nScratch: {scratch_url}")
}

/// Pull the compiler's error lines out of a build's combined output: find
/// an `Error:`/`error:` marker and keep a few following lines, capped to
/// stay readable.
fn extract_diagnostics(stderr: &str, stdout: &str) -> String {
    let combined = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = combined.lines().collect();
    let mut collected = Vec::new();
    let mut i = 0;
    while i < lines.len() && collected.len() < 10 {
        let line = lines[i];
        if line.to_lowercase().contains("error:") {
            collected.push(line);
            for next in lines.iter().skip(i + 1).take(2) {
                let trimmed = next.trim();
                if trimmed.is_empty() || trimmed.starts_with("---") {
                    break;
                }
                collected.push(next);
            }
        }
        i += 1;
    }
    if collected.is_empty() {
        combined.chars().take(500).collect()
    } else {
        collected.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_formats_whole_percent() {
        let msg = commit_message("Foo_80001000", 100.0, "https://decomp.me/scratch/abc");
        assert_eq!(msg, "Match Foo_80001000 (100%)\n\nScratch: https://decomp.me/scratch/abc");
    }

    #[test]
    fn commit_message_formats_fractional_percent() {
        let msg = commit_message("Foo_80001000", 96.5, "https://decomp.me/scratch/abc");
        assert!(msg.starts_with("Match Foo_80001000 (96.5%)"));
    }

    #[test]
    fn object_path_replaces_c_extension() {
        assert_eq!(object_path_for("melee/lb/lbcommand.c"), "build/GALE01/src/melee/lb/lbcommand.o");
    }

    #[test]
    fn extract_diagnostics_pulls_error_marker() {
        let stderr = "some preamble\nError: ^^^^\nexpected ';' before '}' token\n---\nmore noise";
        let diag = extract_diagnostics(stderr, "");
        assert!(diag.contains("expected ';'"));
    }

    #[test]
    fn extract_diagnostics_falls_back_to_truncated_output() {
        let stderr = "compiler exploded with no recognizable marker";
        let diag = extract_diagnostics(stderr, "");
        assert_eq!(diag, stderr);
    }
}
