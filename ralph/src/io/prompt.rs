//! Prompt pack builder for the implementation agent.
//!
//! The template is split into sections by HTML comment markers; when the
//! rendered prompt exceeds the byte budget, droppable sections go first and
//! the last remaining section is truncated. Failure context carries only the
//! failed verifiers' names and reasons, never captured output, so the prompt
//! stays bounded even when verifiers are noisy.

use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::bead::Bead;
use crate::core::types::SuiteResult;

const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");

/// Verifier line for template rendering: name and command, never results.
#[derive(Debug, Clone, Serialize)]
struct VerifierContext {
    name: String,
    command: String,
}

/// Failed-verifier line for the previous-failures section.
#[derive(Debug, Clone, Serialize)]
struct FailureContext {
    name: String,
    reason: String,
}

/// All inputs needed to build a prompt pack.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub title: Option<String>,
    pub intent: String,
    pub verifiers: Vec<(String, String)>,
    /// (name, reason) pairs for verifiers that failed in the prior suite run.
    pub failures: Vec<(String, String)>,
    pub attempt: u32,
    pub max_iterations: u32,
}

impl PromptInputs {
    /// Assemble inputs from a bead and the previous suite evaluation, if any.
    pub fn from_bead(
        bead: &Bead,
        prior_suite: Option<&SuiteResult>,
        attempt: u32,
        max_iterations: u32,
    ) -> Self {
        let failures = prior_suite
            .map(|suite| {
                suite
                    .failed_results()
                    .map(|r| (r.name.clone(), r.reason.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            title: bead.title.clone(),
            intent: bead.intent.clone(),
            verifiers: bead
                .dod
                .verifiers
                .iter()
                .map(|v| (v.name.clone(), v.command.clone()))
                .collect(),
            failures,
            attempt,
            max_iterations,
        }
    }
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("implement", IMPLEMENT_TEMPLATE)
            .expect("implement template should be valid");
        Self { env }
    }

    fn render(&self, input: &PromptInputs) -> String {
        let verifiers: Vec<VerifierContext> = input
            .verifiers
            .iter()
            .map(|(name, command)| VerifierContext {
                name: name.clone(),
                command: command.clone(),
            })
            .collect();
        let failures: Vec<FailureContext> = input
            .failures
            .iter()
            .map(|(name, reason)| FailureContext {
                name: name.clone(),
                reason: reason.clone(),
            })
            .collect();

        let template = self
            .env
            .get_template("implement")
            .expect("implement template is registered");
        template
            .render(context! {
                title => input.title.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                intent => input.intent.trim(),
                verifiers => verifiers,
                failures => (!failures.is_empty()).then_some(failures),
                attempt => input.attempt,
                max_iterations => input.max_iterations,
            })
            .expect("implement template rendering should not fail")
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Parse sections using markers of the form
/// `<!-- section:KEY required|droppable -->`.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    use std::sync::LazyLock;
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).unwrap().as_str().to_string();
        let required = caps.get(2).unwrap().as_str() == "required";
        let start = caps.get(0).unwrap().end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).unwrap().start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Drop droppable sections (then truncate the tail) until under budget.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    while total_len(sections) > budget {
        let Some(idx) = sections.iter().position(|s| !s.required) else {
            break;
        };
        debug!(
            section = %sections[idx].key,
            bytes_dropped = sections[idx].content.len(),
            "dropped section for budget"
        );
        sections.remove(idx);
    }

    // Still over budget: truncate the last section.
    if total_len(sections) > budget && !sections.is_empty() {
        let other_len: usize = sections
            .iter()
            .take(sections.len() - 1)
            .map(|s| s.content.len())
            .sum();
        let allowed = budget.saturating_sub(other_len);
        let last = sections.last_mut().unwrap();
        if last.content.len() > allowed {
            if allowed > 12 {
                last.content.truncate(allowed - 12);
                last.content.push_str("\n[truncated]");
            } else {
                last.content.truncate(allowed);
            }
            debug!(section = %last.key, "truncated section for budget");
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds a prompt pack within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs) -> PromptPack {
        let rendered = PromptEngine::new().render(input);
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        PromptPack {
            content: render_sections(&sections),
        }
    }
}

/// A rendered prompt ready to send to the agent.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn render(&self) -> String {
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> PromptInputs {
        PromptInputs {
            title: Some("Fix the widget".to_string()),
            intent: "Make the widget render".to_string(),
            verifiers: vec![
                ("build".to_string(), "cargo build".to_string()),
                ("unit".to_string(), "cargo test".to_string()),
            ],
            failures: vec![(
                "unit".to_string(),
                "exit code mismatch: expected 0, got 101".to_string(),
            )],
            attempt: 2,
            max_iterations: 10,
        }
    }

    #[test]
    fn prompt_contains_intent_verifiers_and_failures() {
        let pack = PromptBuilder::new(40_000).build(&inputs());
        let content = pack.render();

        assert!(content.contains("Make the widget render"));
        assert!(content.contains("`cargo build`"));
        assert!(content.contains("`cargo test`"));
        assert!(content.contains("unit: exit code mismatch: expected 0, got 101"));
        assert!(content.contains("attempt 2 of 10"));
    }

    #[test]
    fn first_attempt_has_no_failure_section() {
        let mut input = inputs();
        input.failures.clear();
        input.attempt = 1;

        let content = PromptBuilder::new(40_000).build(&input).render();
        assert!(!content.contains("### Previous Failures"));
    }

    #[test]
    fn budget_drops_failures_before_required_sections() {
        let mut input = inputs();
        // A huge droppable section against a budget that comfortably fits the
        // required sections alone.
        input.failures = vec![("unit".to_string(), "boom ".repeat(2_000))];

        let content = PromptBuilder::new(2_000).build(&input).render();
        assert!(!content.contains("### Previous Failures"));
        assert!(content.contains("### Intent"));
        assert!(content.contains("### Verifiers"));
        assert!(content.len() <= 2_000 + 2 * 2, "joined length stays near budget");
    }

    #[test]
    fn failure_section_never_contains_captured_output() {
        // Inputs come pre-filtered to (name, reason); make sure from_bead
        // keeps it that way.
        use crate::core::types::{SuiteResult, VerifierResult};
        use crate::test_support::bead;

        let suite = SuiteResult {
            all_passed: false,
            results: vec![VerifierResult::failed(
                "unit",
                "exit code mismatch: expected 0, got 101",
                "very long stdout dump".to_string(),
                "stack trace".to_string(),
            )],
        };
        let input = PromptInputs::from_bead(&bead("bd-1"), Some(&suite), 2, 5);
        let content = PromptBuilder::new(40_000).build(&input).render();

        assert!(content.contains("exit code mismatch"));
        assert!(!content.contains("very long stdout dump"));
        assert!(!content.contains("stack trace"));
    }
}
