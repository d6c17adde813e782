//! Shared result types produced by verifier and agent execution.
//!
//! These types cross the core/io boundary and are persisted (inside
//! `ralph_meta` and evidence records), so their serialized shape is stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict for one executed verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierResult {
    pub name: String,
    pub passed: bool,
    /// Empty when the verifier passed.
    pub reason: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
}

impl VerifierResult {
    pub fn passed(name: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self {
            name: name.into(),
            passed: true,
            reason: String::new(),
            stdout,
            stderr,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        reason: impl Into<String>,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            reason: reason.into(),
            stdout,
            stderr,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of evaluating an ordered verifier list.
///
/// `results` holds only the verifiers that actually executed, in execution
/// order; verifiers skipped by an early stop are absent entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub all_passed: bool,
    pub results: Vec<VerifierResult>,
}

impl SuiteResult {
    pub fn failed_results(&self) -> impl Iterator<Item = &VerifierResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// One-line summary of the failing verifiers, or `None` when all passed.
    pub fn failure_summary(&self) -> Option<String> {
        let failed: Vec<String> = self
            .failed_results()
            .map(|r| format!("{}: {}", r.name, r.reason))
            .collect();
        if failed.is_empty() {
            return None;
        }
        Some(failed.join("; "))
    }
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOutcome {
    pub success: bool,
    /// Set when the invocation failed (non-zero exit, timeout, spawn error,
    /// open circuit breaker).
    pub reason: Option<String>,
}

impl InvokeOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_lists_only_failed_verifiers() {
        let suite = SuiteResult {
            all_passed: false,
            results: vec![
                VerifierResult::passed("build", String::new(), String::new()),
                VerifierResult::failed("test", "exit code mismatch", String::new(), String::new()),
            ],
        };

        let summary = suite.failure_summary().expect("summary");
        assert!(summary.contains("test: exit code mismatch"));
        assert!(!summary.contains("build"));
    }

    #[test]
    fn failure_summary_is_none_when_all_passed() {
        let suite = SuiteResult {
            all_passed: true,
            results: vec![VerifierResult::passed("build", String::new(), String::new())],
        };
        assert_eq!(suite.failure_summary(), None);
    }
}
