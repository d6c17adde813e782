//! The Ralph loop: invoke the agent, evaluate verifiers, retry with backoff.
//!
//! The loop is strictly sequential for one bead and owns it exclusively for
//! the duration of the run. Termination is guaranteed: the attempt counter
//! strictly increases each pass and is bounded by the iteration budget, and
//! each pass is itself bounded by the agent ceiling and per-verifier
//! timeouts. Every pass consumes one iteration whether the agent invocation
//! or the verifier suite failed; both are treated as transient and waited
//! out with the same capped exponential backoff.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bead::{Bead, BeadStatus};
use crate::core::backoff::Backoff;
use crate::core::breaker::BreakerRegistry;
use crate::core::types::{InvokeOutcome, SuiteResult};
use crate::io::agent::{AgentInvoker, InvokeRequest};
use crate::io::config::RalphConfig;
use crate::io::evidence::{EvidenceRecord, write_evidence};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::store::{BeadPatch, BeadStore, MetaPatch};
use crate::io::verifier::VerifierRunner;
use crate::suite;

const AGENT_BREAKER: &str = "agent";

/// How the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every verifier passed; the bead reached `completed`.
    Completed,
    /// The iteration budget ran out; the bead reached `failed`.
    Exhausted,
}

/// Summary of one loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub bead_id: String,
    pub iterations: u32,
    pub stop: LoopStop,
    pub last_suite: Option<SuiteResult>,
}

/// Per-iteration report passed to the caller's callback.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: u32,
    pub max_iterations: u32,
    pub agent: InvokeOutcome,
    /// Absent when the agent invocation failed (verifiers are skipped).
    pub suite: Option<SuiteResult>,
}

/// Loop parameters assembled from config and workspace paths.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations_default: u32,
    pub initial_backoff: Duration,
    pub backoff_cap: Duration,
    pub agent_timeout: Duration,
    pub agent_output_limit_bytes: usize,
    pub prompt_budget_bytes: usize,
    /// Working directory for agent invocations.
    pub workdir: PathBuf,
    /// Where to write the terminal evidence record.
    pub evidence_path: PathBuf,
    /// Directory for per-attempt agent transcripts, if any.
    pub agent_log_dir: Option<PathBuf>,
    /// Breaker settings; `None` disables the breaker entirely.
    pub breaker: Option<BreakerSettings>,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl LoopConfig {
    pub fn from_config(
        cfg: &RalphConfig,
        workdir: impl Into<PathBuf>,
        evidence_path: impl Into<PathBuf>,
        agent_log_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            max_iterations_default: cfg.max_iterations_default,
            initial_backoff: Duration::from_secs(cfg.initial_backoff_secs),
            backoff_cap: Duration::from_secs(cfg.backoff_cap_secs),
            agent_timeout: Duration::from_secs(cfg.agent_timeout_secs),
            agent_output_limit_bytes: cfg.agent_output_limit_bytes,
            prompt_budget_bytes: cfg.prompt_budget_bytes,
            workdir: workdir.into(),
            evidence_path: evidence_path.into(),
            agent_log_dir,
            breaker: cfg.breaker.enabled.then(|| BreakerSettings {
                failure_threshold: cfg.breaker.failure_threshold,
                cooldown: Duration::from_secs(cfg.breaker.cooldown_secs),
            }),
        }
    }
}

/// Drive one bead to a terminal status.
///
/// Preconditions (agent CLI missing, bead not found or malformed) fail fast
/// before any iteration runs or the bead is modified. Transient conditions
/// (agent non-zero exit or timeout, verifier failures) consume an iteration
/// and back off. Verifier evaluation is skipped entirely on a failed agent
/// invocation; the attempt is known incomplete.
pub fn run_loop<A, R, F>(
    store: &BeadStore,
    bead_id: &str,
    invoker: &A,
    verifier_runner: &R,
    config: &LoopConfig,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    A: AgentInvoker,
    R: VerifierRunner,
    F: FnMut(&IterationReport),
{
    invoker.preflight().context("agent preflight")?;
    let bead = store.load(bead_id)?;

    let max_iterations = bead
        .constraints
        .max_iterations
        .unwrap_or(config.max_iterations_default);
    if let Some(budget) = bead.constraints.time_budget_seconds {
        info!(time_budget_seconds = budget, "time budget is advisory only");
    }
    info!(bead = %bead.id, max_iterations, "starting loop");

    let mut backoff = Backoff::new(config.initial_backoff, config.backoff_cap);
    let mut breakers = config
        .breaker
        .as_ref()
        .map(|b| BreakerRegistry::new(b.failure_threshold, b.cooldown));
    let mut last_suite: Option<SuiteResult> = None;
    let mut attempt = 0u32;

    while attempt < max_iterations {
        attempt += 1;
        store.update(
            bead_id,
            &BeadPatch {
                status: Some(BeadStatus::InProgress),
                meta: MetaPatch {
                    attempt_count: Some(attempt),
                    last_attempt: Some(Utc::now()),
                    backoff_seconds: Some(backoff.current().as_secs()),
                    ..MetaPatch::default()
                },
            },
        )?;

        let agent = invoke_agent(
            invoker,
            &bead,
            last_suite.as_ref(),
            attempt,
            max_iterations,
            config,
            breakers.as_mut(),
        );

        if !agent.success {
            let reason = agent.reason.clone().unwrap_or_default();
            warn!(iteration = attempt, reason = %reason, "agent invocation failed");
            store.update(
                bead_id,
                &BeadPatch {
                    meta: MetaPatch {
                        last_failure_summary: Some(format!("agent invocation failed: {reason}")),
                        ..MetaPatch::default()
                    },
                    ..BeadPatch::default()
                },
            )?;
            on_iteration(&IterationReport {
                iteration: attempt,
                max_iterations,
                agent,
                suite: None,
            });
            // Skip verifiers: the attempt is known incomplete.
            sleep_backoff(&mut backoff, attempt, max_iterations);
            continue;
        }

        let suite_result = suite::evaluate(verifier_runner, &bead.dod.verifiers);
        store.update(
            bead_id,
            &BeadPatch {
                meta: MetaPatch {
                    verifier_results: Some(suite_result.clone()),
                    last_failure_summary: suite_result.failure_summary(),
                    ..MetaPatch::default()
                },
                ..BeadPatch::default()
            },
        )?;

        on_iteration(&IterationReport {
            iteration: attempt,
            max_iterations,
            agent,
            suite: Some(suite_result.clone()),
        });

        if suite_result.all_passed {
            store.update(
                bead_id,
                &BeadPatch {
                    status: Some(BeadStatus::Completed),
                    ..BeadPatch::default()
                },
            )?;
            write_terminal_evidence(config, bead_id, attempt, Some(&suite_result))?;
            info!(bead = %bead_id, iterations = attempt, "bead completed");
            return Ok(LoopOutcome {
                bead_id: bead_id.to_string(),
                iterations: attempt,
                stop: LoopStop::Completed,
                last_suite: Some(suite_result),
            });
        }

        last_suite = Some(suite_result);
        sleep_backoff(&mut backoff, attempt, max_iterations);
    }

    store.update(
        bead_id,
        &BeadPatch {
            status: Some(BeadStatus::Failed),
            meta: MetaPatch {
                last_failure_summary: Some("max iterations reached".to_string()),
                ..MetaPatch::default()
            },
            ..BeadPatch::default()
        },
    )?;
    write_terminal_evidence(config, bead_id, attempt, last_suite.as_ref())?;
    warn!(bead = %bead_id, iterations = attempt, "iteration budget exhausted");
    Ok(LoopOutcome {
        bead_id: bead_id.to_string(),
        iterations: attempt,
        stop: LoopStop::Exhausted,
        last_suite,
    })
}

fn invoke_agent<A: AgentInvoker>(
    invoker: &A,
    bead: &Bead,
    last_suite: Option<&SuiteResult>,
    attempt: u32,
    max_iterations: u32,
    config: &LoopConfig,
    breakers: Option<&mut BreakerRegistry>,
) -> InvokeOutcome {
    if let Some(registry) = breakers {
        if !registry.breaker(AGENT_BREAKER).allow() {
            debug!("agent breaker open, skipping invocation");
            return InvokeOutcome::failed("agent circuit open; invocation skipped");
        }
        let outcome = do_invoke(invoker, bead, last_suite, attempt, max_iterations, config);
        let breaker = registry.breaker(AGENT_BREAKER);
        if outcome.success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
        outcome
    } else {
        do_invoke(invoker, bead, last_suite, attempt, max_iterations, config)
    }
}

fn do_invoke<A: AgentInvoker>(
    invoker: &A,
    bead: &Bead,
    last_suite: Option<&SuiteResult>,
    attempt: u32,
    max_iterations: u32,
    config: &LoopConfig,
) -> InvokeOutcome {
    let inputs = PromptInputs::from_bead(bead, last_suite, attempt, max_iterations);
    let prompt = PromptBuilder::new(config.prompt_budget_bytes)
        .build(&inputs)
        .render();

    let request = InvokeRequest {
        workdir: config.workdir.clone(),
        prompt,
        timeout: config.agent_timeout,
        output_limit_bytes: config.agent_output_limit_bytes,
        log_path: config
            .agent_log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-attempt-{attempt}.log", bead.id))),
    };
    invoker.invoke(&request)
}

fn sleep_backoff(backoff: &mut Backoff, attempt: u32, max_iterations: u32) {
    // No point waiting after the final attempt.
    if attempt >= max_iterations {
        return;
    }
    let delay = backoff.next_delay();
    if delay.is_zero() {
        return;
    }
    debug!(delay_secs = delay.as_secs(), "backing off");
    thread::sleep(delay);
}

fn write_terminal_evidence(
    config: &LoopConfig,
    bead_id: &str,
    iterations: u32,
    suite: Option<&SuiteResult>,
) -> Result<()> {
    let record = EvidenceRecord {
        work_item_id: bead_id.to_string(),
        iterations,
        timestamp: Utc::now(),
        results: suite.map(|s| s.results.clone()).unwrap_or_default(),
    };
    write_evidence(&config.evidence_path, &record)
}
