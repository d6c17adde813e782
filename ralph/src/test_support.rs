//! Test-only helpers: scripted seams and bead constructors.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::bead::{Bead, DefinitionOfDone, Expectation, OnFailure, Verifier};
use crate::core::types::{InvokeOutcome, VerifierResult};
use crate::io::agent::{AgentInvoker, InvokeRequest};
use crate::io::verifier::VerifierRunner;

/// Create a deterministic verifier with default expectations.
pub fn verifier(name: &str, command: &str) -> Verifier {
    Verifier {
        name: name.to_string(),
        command: command.to_string(),
        expect: Expectation::default(),
        timeout_seconds: 30,
        on_failure: OnFailure::Stop,
    }
}

/// Create a minimal valid bead with one always-passing verifier.
pub fn bead(id: &str) -> Bead {
    Bead {
        id: id.to_string(),
        title: None,
        intent: format!("{id} intent"),
        dod: DefinitionOfDone {
            verifiers: vec![verifier("check", "exit 0")],
        },
        constraints: Default::default(),
        status: Default::default(),
        ralph_meta: Default::default(),
    }
}

pub fn passed_result(name: &str) -> VerifierResult {
    VerifierResult::passed(name, String::new(), String::new())
}

pub fn failed_result(name: &str, reason: &str) -> VerifierResult {
    VerifierResult::failed(name, reason, String::new(), String::new())
}

/// Verifier runner that replays queued results in order.
///
/// Panics if run more times than results were queued; tests assert exact
/// execution counts with [`calls`](Self::calls).
pub struct ScriptedVerifierRunner {
    results: RefCell<VecDeque<VerifierResult>>,
    calls: RefCell<u32>,
}

impl ScriptedVerifierRunner {
    pub fn new(results: Vec<VerifierResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(0),
        }
    }

    /// Number of verifiers actually executed.
    pub fn calls(&self) -> u32 {
        *self.calls.borrow()
    }
}

impl VerifierRunner for ScriptedVerifierRunner {
    fn run(&self, verifier: &Verifier) -> VerifierResult {
        *self.calls.borrow_mut() += 1;
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted result left for verifier '{}'", verifier.name))
    }
}

/// Agent invoker that replays queued outcomes and records received prompts.
pub struct ScriptedInvoker {
    outcomes: RefCell<VecDeque<InvokeOutcome>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new(outcomes: Vec<InvokeOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Invoker that always reports success.
    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    /// Prompts received so far, in invocation order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn invocations(&self) -> u32 {
        self.prompts.borrow().len() as u32
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest) -> InvokeOutcome {
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(InvokeOutcome::ok)
    }
}
