//! Worktree resolution: listing git worktrees that back each agent's
//! isolated working copy, and mapping a subdirectory key to the worktree
//! that owns it.
//!
//! Every operation shells out to `git` directly rather than linking a git
//! library, since nothing here needs to read git's object model, only
//! invoke its porcelain commands.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;

use crate::error::WardenError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
}

fn git_stdout(repo_root: &Path, args: &[&str]) -> Result<String, WardenError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(WardenError::Io)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(WardenError::GitError {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// List every worktree git knows about for the repository at `repo_root`.
pub fn list(repo_root: &Path) -> Result<Vec<WorktreeEntry>, WardenError> {
    let raw = git_stdout(repo_root, &["worktree", "list", "--porcelain"])?;
    Ok(parse_worktree_porcelain(&raw))
}

/// Resolve the worktree containing `subdirectory`, relative to `repo_root`.
/// Picks the entry whose path is the longest prefix match, so a nested
/// worktree (if one ever exists) wins over its parent.
pub fn resolve_for_subdirectory(
    repo_root: &Path,
    subdirectory: &str,
) -> Result<WorktreeEntry, WardenError> {
    let target = repo_root.join(subdirectory);
    let entries = list(repo_root)?;
    entries
        .into_iter()
        .filter(|e| target.starts_with(&e.path))
        .max_by_key(|e| e.path.as_os_str().len())
        .ok_or(WardenError::WorktreeNotFound { path: target })
}

/// Create a new worktree at `path` on a fresh branch `branch`, based on
/// the repo's current `HEAD`.
pub fn create(repo_root: &Path, path: &Path, branch: &str) -> Result<(), WardenError> {
    git_stdout(
        repo_root,
        &["worktree", "add", "-b", branch, &path.to_string_lossy()],
    )?;
    Ok(())
}

/// Stage and commit every path in `files` inside `worktree_path`, with
/// `message`. No-ops (returns `Ok(false)`) if `git status --porcelain`
/// reports nothing changed for those paths, so calling this twice in a row
/// is harmless.
pub fn commit_paths(worktree_path: &Path, files: &[PathBuf], message: &str) -> Result<bool, WardenError> {
    let status = git_stdout(worktree_path, &["status", "--porcelain"])?;
    if status.trim().is_empty() {
        return Ok(false);
    }

    let mut add_args: Vec<&str> = vec!["add"];
    let file_strs: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    add_args.extend(file_strs.iter().map(String::as_str));
    git_stdout(worktree_path, &add_args)?;
    git_stdout(worktree_path, &["commit", "-m", message])?;
    Ok(true)
}

/// Revert `path` to its `HEAD` version inside `worktree_path` — used to
/// undo an in-progress source edit that failed to compile.
pub fn revert_path(worktree_path: &Path, path: &Path) -> Result<(), WardenError> {
    git_stdout(worktree_path, &["checkout", "HEAD", "--", &path.to_string_lossy()])?;
    Ok(())
}

/// The current commit hash for `worktree_path`.
pub fn head_hash(worktree_path: &Path) -> Result<String, WardenError> {
    Ok(git_stdout(worktree_path, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Run `git clang-format` over the currently staged diff, honoring the
/// configured timeout rather than `git`'s own default (clang-format can
/// hang on huge generated files).
pub fn clang_format(worktree_path: &Path, timeout: Duration) -> Result<(), WardenError> {
    let output = crate::exec::run("git", &["clang-format"], worktree_path, timeout)?;
    if output.success() {
        Ok(())
    } else {
        Err(WardenError::GitError {
            command: "git clang-format".to_string(),
            stderr: output.stderr,
        })
    }
}

fn parse_worktree_porcelain(raw: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current = WorktreeEntry::default();
    let mut in_entry = false;

    for line in raw.lines() {
        if line.is_empty() {
            if in_entry && current.path.as_os_str() != "" {
                entries.push(std::mem::take(&mut current));
                in_entry = false;
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            current.path = PathBuf::from(path.trim());
            in_entry = true;
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            current.head = Some(head.trim().to_owned());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            current.branch = Some(branch.trim().to_owned());
        }
    }
    if in_entry && current.path.as_os_str() != "" {
        entries.push(current);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_worktrees() {
        let raw = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/ws/alice\nHEAD def456\nbranch refs/heads/alice\n\n";
        let entries = parse_worktree_porcelain(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("/repo"));
        assert_eq!(entries[1].branch.as_deref(), Some("refs/heads/alice"));
    }

    #[test]
    fn parses_detached_entry_with_no_trailing_blank_line() {
        let raw = "worktree /repo\nHEAD abc123\ndetached\n";
        let entries = parse_worktree_porcelain(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch, None);
    }
}
