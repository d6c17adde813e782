//! Verifier execution: one opaque shell command, one structured verdict.
//!
//! The [`VerifierRunner`] trait decouples suite evaluation from process
//! execution. Tests use scripted runners that return predetermined results
//! without spawning anything.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, instrument, warn};

use crate::bead::Verifier;
use crate::core::types::VerifierResult;
use crate::io::process::run_command_with_timeout;

/// Abstraction over verifier execution backends.
///
/// Implementations never return an error: every failure mode (timeout, spawn
/// exception, expectation mismatch) is folded into a failing
/// [`VerifierResult`].
pub trait VerifierRunner {
    fn run(&self, verifier: &Verifier) -> VerifierResult;
}

/// Runs verifier commands under the system shell.
///
/// The command string is opaque: it is handed to `sh -c` (or `cmd /C` on
/// windows) unparsed, with the project root as working directory.
pub struct ShellVerifierRunner {
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl ShellVerifierRunner {
    pub fn new(workdir: impl Into<PathBuf>, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            output_limit_bytes,
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl VerifierRunner for ShellVerifierRunner {
    #[instrument(skip_all, fields(verifier = %verifier.name, timeout_secs = verifier.timeout_seconds))]
    fn run(&self, verifier: &Verifier) -> VerifierResult {
        let mut cmd = shell_command(&verifier.command);
        cmd.current_dir(&self.workdir);

        debug!(command = %verifier.command, "running verifier");
        let output = match run_command_with_timeout(
            cmd,
            None,
            verifier.timeout(),
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "verifier execution raised");
                return VerifierResult::failed(
                    &verifier.name,
                    format!("exception: {err:#}"),
                    String::new(),
                    String::new(),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.timed_out {
            return VerifierResult::failed(
                &verifier.name,
                format!("timed out after {}s", verifier.timeout_seconds),
                stdout,
                stderr,
            );
        }

        let expected = verifier.expect.exit_code;
        match output.status.code() {
            Some(code) if code == expected => {}
            Some(code) => {
                return VerifierResult::failed(
                    &verifier.name,
                    format!("exit code mismatch: expected {expected}, got {code}"),
                    stdout,
                    stderr,
                );
            }
            None => {
                return VerifierResult::failed(
                    &verifier.name,
                    format!("exit code mismatch: expected {expected}, process was terminated by a signal"),
                    stdout,
                    stderr,
                );
            }
        }

        // Literal, case-sensitive substring expectations.
        if let Some(needle) = &verifier.expect.stdout_contains
            && !stdout.contains(needle.as_str())
        {
            return VerifierResult::failed(
                &verifier.name,
                format!("stdout missing expected substring {needle:?}"),
                stdout,
                stderr,
            );
        }
        if let Some(needle) = &verifier.expect.stderr_contains
            && !stderr.contains(needle.as_str())
        {
            return VerifierResult::failed(
                &verifier.name,
                format!("stderr missing expected substring {needle:?}"),
                stdout,
                stderr,
            );
        }

        VerifierResult::passed(&verifier.name, stdout, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bead::{Expectation, OnFailure};

    fn verifier(name: &str, command: &str) -> Verifier {
        Verifier {
            name: name.to_string(),
            command: command.to_string(),
            expect: Expectation::default(),
            timeout_seconds: 30,
            on_failure: OnFailure::Stop,
        }
    }

    fn runner() -> ShellVerifierRunner {
        let workdir = std::env::temp_dir();
        ShellVerifierRunner::new(workdir, 100_000)
    }

    #[test]
    fn default_expectation_passes_on_exit_zero() {
        let result = runner().run(&verifier("ok", "exit 0"));
        assert!(result.passed);
        assert!(result.reason.is_empty());
    }

    #[test]
    fn exit_code_mismatch_cites_both_codes() {
        let result = runner().run(&verifier("fails", "exit 4"));
        assert!(!result.passed);
        assert!(result.reason.contains("expected 0"));
        assert!(result.reason.contains("got 4"));
    }

    #[test]
    fn nonzero_expectation_matches_nonzero_exit() {
        let mut v = verifier("grep-miss", "exit 1");
        v.expect.exit_code = 1;
        let result = runner().run(&v);
        assert!(result.passed);
    }

    #[test]
    fn stdout_substring_expectation_is_case_sensitive() {
        let mut v = verifier("greeting", "echo Hello");
        v.expect.stdout_contains = Some("hello".to_string());
        let result = runner().run(&v);
        assert!(!result.passed);
        assert!(result.reason.contains("stdout missing"));

        v.expect.stdout_contains = Some("Hello".to_string());
        let result = runner().run(&v);
        assert!(result.passed);
    }

    #[test]
    fn stderr_substring_expectation_is_checked() {
        let mut v = verifier("warns", "echo oops >&2");
        v.expect.stderr_contains = Some("oops".to_string());
        let result = runner().run(&v);
        assert!(result.passed, "reason: {}", result.reason);
    }

    #[test]
    fn timeout_kills_and_reports_within_bound() {
        let start = std::time::Instant::now();
        let mut v = verifier("slow", "sleep 10");
        v.timeout_seconds = 1;

        let result = runner().run(&v);
        assert!(!result.passed);
        assert!(result.reason.contains("timed out after 1s"));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn spawn_exception_becomes_failing_result() {
        // A missing working directory makes the shell itself fail to spawn.
        let runner = ShellVerifierRunner::new("/nonexistent/ralph-test-workdir", 100_000);
        let result = runner.run(&verifier("broken", "exit 0"));
        assert!(!result.passed);
        assert!(result.reason.starts_with("exception:"));
    }
}
