//! Agent invocation: spawn the external coding agent with a bounded runtime.
//!
//! The [`AgentInvoker`] trait decouples the loop from the agent backend.
//! Tests use scripted invokers that return predetermined outcomes without
//! spawning processes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::InvokeOutcome;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text delivered on the agent's stdin.
    pub prompt: String,
    /// Hard ceiling on agent runtime; exceeding it kills the process.
    pub timeout: Duration,
    /// Truncate the captured agent transcript beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Where to write the agent stdout/stderr transcript, if anywhere.
    pub log_path: Option<PathBuf>,
}

/// Abstraction over agent execution backends.
pub trait AgentInvoker {
    /// Startup check that the backend is usable at all. Runs once before the
    /// loop starts, never per iteration.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Run the agent once. All failure modes (non-zero exit, timeout, spawn
    /// error) fold into a failed [`InvokeOutcome`], never an error.
    fn invoke(&self, request: &InvokeRequest) -> InvokeOutcome;
}

/// The configured agent CLI is not installed.
#[derive(Debug)]
pub struct AgentUnavailableError {
    pub program: String,
}

impl fmt::Display for AgentUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent CLI '{}' not found on PATH", self.program)
    }
}

impl std::error::Error for AgentUnavailableError {}

/// Invoker that spawns a configured agent CLI argv.
pub struct CliAgentInvoker {
    command: Vec<String>,
}

impl CliAgentInvoker {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("agent command must be a non-empty argv"));
        }
        Ok(Self { command })
    }
}

impl AgentInvoker for CliAgentInvoker {
    fn preflight(&self) -> Result<()> {
        let program = &self.command[0];
        which::which(program)
            .map_err(|_| {
                anyhow::Error::new(AgentUnavailableError {
                    program: program.clone(),
                })
            })
            .map(|path| debug!(program = %program, path = %path.display(), "agent CLI resolved"))
    }

    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &InvokeRequest) -> InvokeOutcome {
        info!(workdir = %request.workdir.display(), "invoking agent");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&request.workdir);

        let output = match run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "agent spawn failed");
                return InvokeOutcome::failed(format!("agent spawn failed: {err:#}"));
            }
        };

        if let Some(path) = &request.log_path
            && let Err(err) = write_agent_log(path, &output)
        {
            warn!(err = %err, path = %path.display(), "failed to write agent transcript");
        }

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return InvokeOutcome::failed(format!(
                "agent timed out after {}s",
                request.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited non-zero");
            return InvokeOutcome::failed(format!(
                "agent exited with status {:?}",
                output.status.code()
            ));
        }

        debug!("agent invocation succeeded");
        InvokeOutcome::ok()
    }
}

fn write_agent_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    if output.stdout_truncated > 0 {
        buf.push_str(&format!(
            "\n[stdout truncated {} bytes]\n",
            output.stdout_truncated
        ));
    }
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.stderr_truncated > 0 {
        buf.push_str(&format!(
            "\n[stderr truncated {} bytes]\n",
            output.stderr_truncated
        ));
    }
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &Path) -> InvokeRequest {
        InvokeRequest {
            workdir: workdir.to_path_buf(),
            prompt: "do the thing".to_string(),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
            log_path: None,
        }
    }

    #[test]
    fn preflight_fails_for_missing_binary() {
        let invoker =
            CliAgentInvoker::new(vec!["ralph-test-no-such-agent".to_string()]).expect("invoker");
        let err = invoker.preflight().unwrap_err();
        assert!(err.downcast_ref::<AgentUnavailableError>().is_some());
        assert!(err.to_string().contains("ralph-test-no-such-agent"));
    }

    #[test]
    fn preflight_passes_for_resolvable_binary() {
        let invoker = CliAgentInvoker::new(vec!["sh".to_string()]).expect("invoker");
        invoker.preflight().expect("sh should resolve");
    }

    #[test]
    fn invoke_succeeds_on_exit_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `cat` consumes the prompt from stdin and exits 0.
        let invoker = CliAgentInvoker::new(vec!["cat".to_string()]).expect("invoker");
        let outcome = invoker.invoke(&request(temp.path()));
        assert!(outcome.success);
    }

    #[test]
    fn invoke_fails_on_nonzero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invoker =
            CliAgentInvoker::new(vec!["sh".to_string(), "-c".to_string(), "exit 7".to_string()])
                .expect("invoker");
        let outcome = invoker.invoke(&request(temp.path()));
        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("7"));
    }

    #[test]
    fn invoke_writes_transcript_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs").join("agent.log");
        let invoker = CliAgentInvoker::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo working".to_string(),
        ])
        .expect("invoker");

        let mut req = request(temp.path());
        req.log_path = Some(log_path.clone());
        let outcome = invoker.invoke(&req);

        assert!(outcome.success);
        let log = fs::read_to_string(&log_path).expect("read log");
        assert!(log.contains("working"));
    }

    #[test]
    fn invoke_times_out_and_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invoker = CliAgentInvoker::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 10".to_string(),
        ])
        .expect("invoker");

        let mut req = request(temp.path());
        req.timeout = Duration::from_secs(1);
        let start = std::time::Instant::now();
        let outcome = invoker.invoke(&req);

        assert!(!outcome.success);
        assert!(outcome.reason.unwrap().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
