//! Circuit breakers for repeatedly failing collaborators.
//!
//! A breaker is tagged state with explicit transitions, owned by whichever
//! component needs it through a name-keyed registry. The loop uses one named
//! `"agent"` to avoid spawning an agent CLI that keeps failing; a denied call
//! is reported as an ordinary invocation failure, so loop-termination
//! semantics are unchanged.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; tracks consecutive failures.
    Closed { consecutive_failures: u32 },
    /// Calls are denied until the cooldown elapses.
    Open { since: Instant },
    /// One probe call is allowed; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed {
                consecutive_failures: 0,
            },
            threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a call may proceed. An open breaker transitions to half-open
    /// once its cooldown has elapsed, admitting a single probe.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => true,
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&mut self) {
        self.state = match self.state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.threshold {
                    BreakerState::Open {
                        since: Instant::now(),
                    }
                } else {
                    BreakerState::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            // A failed probe re-opens; a failure while open restarts the cooldown.
            BreakerState::HalfOpen | BreakerState::Open { .. } => BreakerState::Open {
                since: Instant::now(),
            },
        };
    }
}

/// Name-keyed breakers sharing one threshold/cooldown configuration.
#[derive(Debug)]
pub struct BreakerRegistry {
    threshold: u32,
    cooldown: Duration,
    breakers: HashMap<String, CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            breakers: HashMap::new(),
        }
    }

    /// Fetch the breaker for `name`, creating it closed on first use.
    pub fn breaker(&mut self, name: &str) -> &mut CircuitBreaker {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.threshold, self.cooldown))
    }
}
