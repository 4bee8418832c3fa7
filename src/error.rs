//! Unified error type for the Workflow Driver and Commit Applier.
//!
//! Each variant is designed to be self-contained: an agent receiving this
//! error should understand what happened and what to do next without
//! additional context, the same contract the underlying state store's
//! errors carry.

use std::fmt;
use std::path::PathBuf;

use warden_core::StoreError;

#[derive(Debug)]
pub enum WardenError {
    /// The requested function is not known to the state store.
    FunctionNotFound { name: String },

    /// Could not resolve a source file for the given function name.
    SourceFileNotFound { function: String },

    /// `commit apply`/`workflow finish` ran without `--force` and the
    /// function isn't a complete (100%) match.
    NotFullyMatched { function: String, match_percent: f64 },

    /// The worktree for an operation could not be determined or does not
    /// exist on disk.
    WorktreeNotFound { path: PathBuf },

    /// A subdirectory lock is held by another agent.
    SubdirectoryLocked { key: String, holder: String },

    /// Compiling the updated source (via ninja) failed.
    BuildFailed { object: String, diagnostics: String },

    /// A git command exited non-zero.
    GitError { command: String, stderr: String },

    /// The build-config file does not mention the given source path.
    BuildConfigPathNotFound { path: PathBuf },

    /// A configuration file could not be loaded or parsed.
    ConfigError { path: PathBuf, detail: String },

    /// `workflow finish` was invoked by an agent that does not hold the
    /// function's active claim.
    NotClaimedByAgent { function: String, agent: String },

    /// Too many broken builds already sit in the target subdirectory to
    /// allow another forced, build-broken commit.
    BrokenBuildThresholdExceeded { worktree: String, count: i64, threshold: u32 },

    /// No usable scratch could be found or created for a function.
    NoScratchAvailable { function: String },

    /// A function, agent, scratch, or subdirectory identifier failed
    /// validation (empty, too long, or contains whitespace).
    InvalidIdentifier(String),

    /// The underlying state store reported an error.
    Store(StoreError),

    /// The scratch-service HTTP client reported an error.
    Scratch(warden_scratch::ScratchError),

    /// The Context Builder reported an error.
    Context(warden_context::ContextError),

    /// An I/O error occurred.
    Io(std::io::Error),
}

impl WardenError {
    /// A short, stable machine-readable tag for this error variant, used by
    /// the CLI's `--json` output mode instead of matching on display text.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FunctionNotFound { .. } => "function_not_found",
            Self::SourceFileNotFound { .. } => "source_file_not_found",
            Self::NotFullyMatched { .. } => "not_fully_matched",
            Self::WorktreeNotFound { .. } => "worktree_not_found",
            Self::SubdirectoryLocked { .. } => "subdirectory_locked",
            Self::BuildFailed { .. } => "build_failed",
            Self::GitError { .. } => "git_error",
            Self::BuildConfigPathNotFound { .. } => "build_config_path_not_found",
            Self::ConfigError { .. } => "config_error",
            Self::NotClaimedByAgent { .. } => "not_claimed_by_agent",
            Self::BrokenBuildThresholdExceeded { .. } => "broken_build_threshold_exceeded",
            Self::NoScratchAvailable { .. } => "no_scratch_available",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::Store(_) => "store_error",
            Self::Scratch(_) => "scratch_error",
            Self::Context(_) => "context_error",
            Self::Io(_) => "io_error",
        }
    }

    /// The `message`/`hint` this error splits into for structured output:
    /// everything before the first "\n  To fix:"-style continuation line is
    /// the message, the rest (if any) is the hint.
    #[must_use]
    pub fn message_and_hint(&self) -> (String, Option<String>) {
        let full = self.to_string();
        match full.split_once("\n  ") {
            Some((message, hint)) => (message.to_owned(), Some(hint.to_owned())),
            None => (full, None),
        }
    }

    /// The process exit code this error should produce: user-facing
    /// mistakes (bad input, missing preconditions) exit `1`; failures in an
    /// external collaborator (the build, git, the scratch service, the
    /// store) exit `2`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::FunctionNotFound { .. }
            | Self::SourceFileNotFound { .. }
            | Self::NotFullyMatched { .. }
            | Self::WorktreeNotFound { .. }
            | Self::SubdirectoryLocked { .. }
            | Self::BuildConfigPathNotFound { .. }
            | Self::ConfigError { .. }
            | Self::NotClaimedByAgent { .. }
            | Self::BrokenBuildThresholdExceeded { .. }
            | Self::InvalidIdentifier(_) => 1,
            Self::BuildFailed { .. }
            | Self::GitError { .. }
            | Self::Store(_)
            | Self::Scratch(_)
            | Self::Context(_)
            | Self::Io(_)
            | Self::NoScratchAvailable { .. } => 2,
        }
    }
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FunctionNotFound { name } => {
                write!(
                    f,
                    "function '{name}' is not known to the state store.\n  To fix: run `extract list` to see known functions, or `extract get {name}` to register it."
                )
            }
            Self::SourceFileNotFound { function } => {
                write!(
                    f,
                    "could not find a source file defining '{function}'.\n  To fix: check the splits/symbol map covers this function, or add a stub with `stub add {function}`."
                )
            }
            Self::NotFullyMatched { function, match_percent } => {
                write!(
                    f,
                    "'{function}' is only {match_percent:.1}% matched, refusing to commit.\n  To fix: keep iterating until the scratch reaches 100%, or pass --force --diagnosis <text> to commit anyway."
                )
            }
            Self::WorktreeNotFound { path } => {
                write!(
                    f,
                    "worktree not found at '{}'.\n  To fix: run `worktree list` to see known worktrees.",
                    path.display()
                )
            }
            Self::SubdirectoryLocked { key, holder } => {
                write!(
                    f,
                    "subdirectory '{key}' is locked by agent '{holder}'.\n  To fix: wait for the lock to expire, or coordinate with that agent."
                )
            }
            Self::BuildFailed { object, diagnostics } => {
                write!(f, "build failed for '{object}'")?;
                if !diagnostics.is_empty() {
                    write!(f, ":\n{diagnostics}")?;
                }
                write!(f, "\n  The source file was reverted; fix the error and retry.")
            }
            Self::GitError { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(f, "\n  To fix: check `git status` and retry.")
            }
            Self::BuildConfigPathNotFound { path } => {
                write!(
                    f,
                    "'{}' is not listed in the build config.\n  To fix: check the path matches exactly what the build config enumerates.",
                    path.display()
                )
            }
            Self::ConfigError { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {detail}\n  To fix: edit the config file and correct the issue.",
                    path.display()
                )
            }
            Self::NotClaimedByAgent { function, agent } => {
                write!(
                    f,
                    "'{function}' is not claimed by agent '{agent}'.\n  To fix: run `claim add {function}` first, or check which agent holds it."
                )
            }
            Self::BrokenBuildThresholdExceeded { worktree, count, threshold } => {
                write!(
                    f,
                    "worktree '{worktree}' already has {count} broken-build functions (threshold {threshold}).\n  To fix: resolve existing broken builds before forcing another."
                )
            }
            Self::NoScratchAvailable { function } => {
                write!(
                    f,
                    "no usable scratch could be found or created for '{function}'.\n  To fix: check the scratch service is reachable and the function's assembly is available."
                )
            }
            Self::InvalidIdentifier(detail) => write!(f, "{detail}"),
            Self::Store(err) => write!(f, "state store error: {err}"),
            Self::Scratch(err) => write!(f, "scratch service error: {err}"),
            Self::Context(err) => write!(f, "context builder error: {err}"),
            Self::Io(err) => {
                write!(f, "I/O error: {err}\n  To fix: check file permissions and disk space.")
            }
        }
    }
}

impl std::error::Error for WardenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Scratch(err) => Some(err),
            Self::Context(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<StoreError> for WardenError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<warden_scratch::ScratchError> for WardenError {
    fn from(err: warden_scratch::ScratchError) -> Self {
        Self::Scratch(err)
    }
}

impl From<warden_context::ContextError> for WardenError {
    fn from(err: warden_context::ContextError) -> Self {
        Self::Context(err)
    }
}

impl From<warden_core::model::IdError> for WardenError {
    fn from(err: warden_core::model::IdError) -> Self {
        Self::InvalidIdentifier(err.to_string())
    }
}

impl From<crate::config::ConfigError> for WardenError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::ConfigError {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_fully_matched_mentions_force_flag() {
        let err = WardenError::NotFullyMatched {
            function: "Foo_80001234".to_owned(),
            match_percent: 87.5,
        };
        let msg = format!("{err}");
        assert!(msg.contains("87.5%"));
        assert!(msg.contains("--force"));
    }

    #[test]
    fn display_subdirectory_locked_names_holder() {
        let err = WardenError::SubdirectoryLocked {
            key: "melee/lb".to_owned(),
            holder: "claude99".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("melee/lb"));
        assert!(msg.contains("claude99"));
    }

    #[test]
    fn display_build_failed_includes_diagnostics() {
        let err = WardenError::BuildFailed {
            object: "build/GALE01/src/melee/lb/lb_command.o".to_owned(),
            diagnostics: "error: expected ';'".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("expected ';'"));
        assert!(msg.contains("reverted"));
    }
}
