//! Transition resolution for finished attempts.
//!
//! Pure decision logic: given the compiled chain, the link that just
//! finished, and the attempt history of the execution, decide where the
//! execution goes next. Nothing here touches storage.

use std::collections::HashMap;

use skillchain_types::chain::{FailureTransition, Link, SuccessTransition};
use skillchain_types::execution::{EscalationCause, LinkExecution, LinkOutcome, TransitionTaken};

use crate::chain::CompiledChain;

/// Intervention reason used when a link runs out of attempts.
pub fn max_retries_reason(link_name: &str) -> String {
    format!("max retries exceeded on link {link_name}")
}

/// Intervention reason used when the chain-wide failure budget is gone.
pub const FAILURE_BUDGET_REASON: &str = "chain-wide failure budget exceeded";

/// Intervention reason used when a link escalates by policy without giving
/// a reason of its own.
pub const LINK_POLICY_REASON: &str = "escalation requested by link policy";

// ---------------------------------------------------------------------------
// AttemptHistory
// ---------------------------------------------------------------------------

/// Attempt counts per link for one execution.
///
/// Attempt numbers are cumulative per (execution, link): every new attempt
/// at a link is numbered one past the highest number seen for that link,
/// whichever path led there.
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    highest: HashMap<String, u32>,
    pending: Option<LinkExecution>,
}

impl AttemptHistory {
    pub fn from_attempts(attempts: &[LinkExecution]) -> Self {
        let mut history = Self::default();
        for attempt in attempts {
            let entry = history.highest.entry(attempt.link_id.clone()).or_insert(0);
            *entry = (*entry).max(attempt.attempt_number);
            if attempt.outcome == LinkOutcome::Pending {
                history.pending = Some(attempt.clone());
            }
        }
        history
    }

    /// The single attempt still awaiting an outcome, if any.
    pub fn pending(&self) -> Option<&LinkExecution> {
        self.pending.as_ref()
    }

    pub fn attempts_for(&self, link_id: &str) -> u32 {
        self.highest.get(link_id).copied().unwrap_or(0)
    }

    pub fn next_attempt(&self, link_id: &str) -> u32 {
        self.attempts_for(link_id) + 1
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Where an execution goes after an attempt finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Create and dispatch a new attempt.
    Dispatch {
        link_id: String,
        attempt_number: u32,
        taken: TransitionTaken,
    },
    /// The execution is done.
    Complete,
    /// Pause for a human decision, parked on `link_id`.
    Escalate {
        link_id: String,
        cause: EscalationCause,
        reason: String,
    },
}

impl Decision {
    /// The audit record for the attempt that produced this decision.
    pub fn transition_taken(&self) -> TransitionTaken {
        match self {
            Decision::Dispatch { taken, .. } => taken.clone(),
            Decision::Complete => TransitionTaken::Complete,
            Decision::Escalate { cause, .. } => TransitionTaken::Escalate { cause: *cause },
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionResolver
// ---------------------------------------------------------------------------

/// Stateless resolver for success and failure transitions.
pub struct TransitionResolver;

impl TransitionResolver {
    /// Resolve a link's success transition.
    ///
    /// `NextLink` on the last link completes the execution.
    pub fn on_success(chain: &CompiledChain, link: &Link, history: &AttemptHistory) -> Decision {
        match &link.on_success {
            SuccessTransition::NextLink => match chain.link_after(link) {
                Some(next) => Self::enter(
                    chain,
                    &next.id,
                    history,
                    TransitionTaken::NextLink {
                        target: next.id.clone(),
                    },
                ),
                None => Decision::Complete,
            },
            SuccessTransition::GoToLink(target) => Self::enter(
                chain,
                target,
                history,
                TransitionTaken::GoToLink {
                    target: target.clone(),
                },
            ),
            SuccessTransition::Complete => Decision::Complete,
        }
    }

    /// Move to `target`, unless it has already used up its attempts in this
    /// execution, in which case the execution escalates parked on it.
    fn enter(
        chain: &CompiledChain,
        target: &str,
        history: &AttemptHistory,
        taken: TransitionTaken,
    ) -> Decision {
        if let Some(link) = chain.link(target) {
            if history.attempts_for(target) >= link.max_retries {
                return Decision::Escalate {
                    link_id: link.id.clone(),
                    cause: EscalationCause::MaxRetriesExceeded,
                    reason: max_retries_reason(&link.name),
                };
            }
        }
        Decision::Dispatch {
            link_id: target.to_string(),
            attempt_number: history.next_attempt(target),
            taken,
        }
    }

    /// Resolve a failure.
    ///
    /// `total_failure_count` must already include this failure. Budgets are
    /// checked before the link's own policy, the link budget first:
    /// 1. `attempt_number >= max_retries` escalates.
    /// 2. `total_failure_count >= max_total_failures` escalates.
    /// 3. Otherwise the link's `on_failure` applies.
    pub fn on_failure(
        chain: &CompiledChain,
        link: &Link,
        attempt_number: u32,
        total_failure_count: u32,
        reported_reason: Option<&str>,
        history: &AttemptHistory,
    ) -> Decision {
        if attempt_number >= link.max_retries {
            return Decision::Escalate {
                link_id: link.id.clone(),
                cause: EscalationCause::MaxRetriesExceeded,
                reason: max_retries_reason(&link.name),
            };
        }
        if total_failure_count >= chain.max_total_failures() {
            return Decision::Escalate {
                link_id: link.id.clone(),
                cause: EscalationCause::FailureBudgetExceeded,
                reason: FAILURE_BUDGET_REASON.to_string(),
            };
        }

        match &link.on_failure {
            FailureTransition::Retry => {
                let next_attempt = history.next_attempt(&link.id);
                Decision::Dispatch {
                    link_id: link.id.clone(),
                    attempt_number: next_attempt,
                    taken: TransitionTaken::Retry { next_attempt },
                }
            }
            FailureTransition::GoToLink(target) => Self::enter(
                chain,
                target,
                history,
                TransitionTaken::GoToLink {
                    target: target.clone(),
                },
            ),
            FailureTransition::Escalate => Decision::Escalate {
                link_id: link.id.clone(),
                cause: EscalationCause::LinkPolicy,
                reason: reported_reason
                    .or(link.escalation_reason.as_deref())
                    .unwrap_or(LINK_POLICY_REASON)
                    .to_string(),
            },
        }
    }
}
