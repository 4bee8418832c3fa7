//! External-process invocation with a captured-output, timeout, and
//! exit-code contract shared by the worktree, build-verification, and
//! commit layers.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Error indicating the child process exited with a non-zero status, or
/// was killed for exceeding its timeout. Carries the exit code for the
/// caller to propagate as the CLI's own exit code.
#[derive(Debug)]
pub struct ExitCodeError {
    pub command: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for ExitCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` exited with code {}", self.command, self.code)
    }
}

impl std::error::Error for ExitCodeError {}

#[derive(Debug)]
pub struct Output {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Run `program` with `args` in `cwd`, capturing stdout/stderr, killing it
/// if it runs longer than `timeout`. Does not interpret a non-zero exit
/// code as an error itself — callers decide (some external failures, like
/// a failed compile, are expected and handled, not propagated as an
/// [`ExitCodeError`]).
pub fn run(program: &str, args: &[&str], cwd: &std::path::Path, timeout: Duration) -> std::io::Result<Output> {
    let mut child: Child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let start = Instant::now();
    let status_code = loop {
        if let Some(status) = child.try_wait()? {
            break status.code();
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    Ok(Output { status_code, stdout, stderr })
}

/// Like [`run`], but turns a non-zero or timed-out exit into an
/// [`ExitCodeError`] — for commands whose failure is always fatal to the
/// caller (e.g. a git operation that must succeed).
pub fn run_checked(
    program: &str,
    args: &[&str],
    cwd: &std::path::Path,
    timeout: Duration,
) -> std::io::Result<Result<Output, ExitCodeError>> {
    let output = run(program, args, cwd, timeout)?;
    if output.success() {
        Ok(Ok(output))
    } else {
        Ok(Err(ExitCodeError {
            command: format!("{program} {}", args.join(" ")),
            code: output.status_code.unwrap_or(124),
            stdout: output.stdout,
            stderr: output.stderr,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let out = run("echo", &["hello"], std::path::Path::new("."), Duration::from_secs(5)).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let out = run("false", &[], std::path::Path::new("."), Duration::from_secs(5)).unwrap();
        assert!(!out.success());
    }

    #[test]
    fn run_checked_wraps_failure() {
        let result = run_checked("false", &[], std::path::Path::new("."), Duration::from_secs(5)).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn timeout_kills_long_running_process() {
        let start = Instant::now();
        let out = run("sleep", &["5"], std::path::Path::new("."), Duration::from_millis(200)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!out.success());
    }
}
