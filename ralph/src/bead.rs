//! Bead document model: a unit of work with a verifier-based Definition of Done.
//!
//! All optional fields default at the serde boundary so hand-written bead files
//! can stay minimal. Semantic checks that the schema cannot express live in
//! [`Bead::validate`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::SuiteResult;

/// Default per-verifier timeout when `timeout_seconds` is absent.
pub const DEFAULT_VERIFIER_TIMEOUT_SECS: u64 = 300;

/// Lifecycle status of a bead. Mutated only by the loop via the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A persisted work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub intent: String,
    pub dod: DefinitionOfDone,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub status: BeadStatus,
    #[serde(default)]
    pub ralph_meta: RalphMeta,
}

/// The pass/fail checks that define completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionOfDone {
    pub verifiers: Vec<Verifier>,
}

/// A single automated check: an opaque shell command plus its expected outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verifier {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub expect: Expectation,
    #[serde(default = "default_verifier_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub on_failure: OnFailure,
}

impl Verifier {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_verifier_timeout() -> u64 {
    DEFAULT_VERIFIER_TIMEOUT_SECS
}

/// Expected outcome of a verifier command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expectation {
    pub exit_code: i32,
    pub stdout_contains: Option<String>,
    pub stderr_contains: Option<String>,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            exit_code: 0,
            stdout_contains: None,
            stderr_contains: None,
        }
    }
}

/// Suite policy when this verifier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Halt the suite; later verifiers are not executed.
    #[default]
    Stop,
    /// Keep evaluating later verifiers despite the failure.
    Continue,
}

/// Caller-facing bounds on the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Constraints {
    /// Iteration budget; the runner's configured default applies when absent.
    pub max_iterations: Option<u32>,
    /// Advisory wall-clock budget. Logged, never enforced by the loop.
    pub time_budget_seconds: Option<u64>,
}

/// Loop bookkeeping persisted alongside the bead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RalphMeta {
    pub attempt_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub backoff_seconds: Option<u64>,
    pub last_failure_summary: Option<String>,
    pub verifier_results: Option<SuiteResult>,
}

impl Bead {
    /// Semantic checks beyond the JSON schema. Returns human-readable
    /// violations; empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.id.trim().is_empty() {
            errors.push("id must be non-empty".to_string());
        }
        if self.intent.trim().is_empty() {
            errors.push("intent must be non-empty".to_string());
        }
        if self.dod.verifiers.is_empty() {
            errors.push("dod.verifiers must contain at least one verifier".to_string());
        }
        for verifier in &self.dod.verifiers {
            if verifier.name.trim().is_empty() {
                errors.push("verifier name must be non-empty".to_string());
            }
            if verifier.command.trim().is_empty() {
                errors.push(format!("verifier '{}' has an empty command", verifier.name));
            }
            if verifier.timeout_seconds == 0 {
                errors.push(format!(
                    "verifier '{}' has timeout_seconds = 0",
                    verifier.name
                ));
            }
        }
        if let Some(max) = self.constraints.max_iterations
            && max == 0
        {
            errors.push("constraints.max_iterations must be >= 1".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_bead_parses_with_defaults() {
        let raw = r#"{
            "id": "bd-1",
            "intent": "make the build green",
            "dod": { "verifiers": [{ "name": "build", "command": "cargo build" }] }
        }"#;

        let bead: Bead = serde_json::from_str(raw).expect("parse");
        assert_eq!(bead.status, BeadStatus::Pending);
        assert_eq!(bead.ralph_meta.attempt_count, 0);
        assert_eq!(bead.constraints.max_iterations, None);

        let verifier = &bead.dod.verifiers[0];
        assert_eq!(verifier.expect.exit_code, 0);
        assert_eq!(verifier.timeout_seconds, DEFAULT_VERIFIER_TIMEOUT_SECS);
        assert_eq!(verifier.on_failure, OnFailure::Stop);
        assert!(bead.validate().is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&BeadStatus::InProgress).expect("serialize");
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn validate_reports_semantic_violations() {
        let raw = r#"{
            "id": "bd-1",
            "intent": "   ",
            "dod": { "verifiers": [{ "name": "check", "command": " " }] },
            "constraints": { "max_iterations": 0 }
        }"#;

        let bead: Bead = serde_json::from_str(raw).expect("parse");
        let errors = bead.validate();
        assert!(errors.iter().any(|e| e.contains("intent")));
        assert!(errors.iter().any(|e| e.contains("empty command")));
        assert!(errors.iter().any(|e| e.contains("max_iterations")));
    }
}
