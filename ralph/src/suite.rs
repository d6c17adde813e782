//! Verifier suite evaluation: ordered, with stop-on-first-failure.
//!
//! Early stop is a cost-control policy: expensive downstream checks (a full
//! test suite) should not run when a cheap upstream check (the build) has
//! already failed. A verifier opts out with `on_failure = "continue"`.

use tracing::{info, warn};

use crate::bead::{OnFailure, Verifier};
use crate::core::types::SuiteResult;
use crate::io::verifier::VerifierRunner;

/// Evaluate `verifiers` in list order.
///
/// A failing verifier with `on_failure = stop` halts evaluation; verifiers
/// after it are not executed and are absent from the result list. `all_passed`
/// is true iff the suite ran to completion and every result passed.
pub fn evaluate<R: VerifierRunner>(runner: &R, verifiers: &[Verifier]) -> SuiteResult {
    let mut results = Vec::with_capacity(verifiers.len());
    let mut stopped_early = false;

    for verifier in verifiers {
        let result = runner.run(verifier);
        if result.passed {
            info!(verifier = %result.name, "verifier passed");
        } else {
            warn!(verifier = %result.name, reason = %result.reason, "verifier failed");
        }

        let stop = !result.passed && verifier.on_failure == OnFailure::Stop;
        results.push(result);
        if stop {
            stopped_early = true;
            break;
        }
    }

    let all_passed = !stopped_early && results.iter().all(|r| r.passed);
    SuiteResult {
        all_passed,
        results,
    }
}
