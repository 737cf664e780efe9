//! The link invoker seam.
//!
//! The engine hands out `DispatchRequest`s and expects outcomes back via
//! `record_outcome`; how a skill is actually run is up to the invoker.
//! `ChainDriver` wires an in-process invoker to the engine for callers that
//! want to run an execution end to end.

use skillchain_types::error::EngineError;
use skillchain_types::execution::{DispatchRequest, OutcomeReport, ReportedOutcome, Transition};

use crate::repository::chain::ChainRepository;
use crate::repository::execution::ExecutionRepository;

use super::state_machine::ChainEngine;

/// Runs one attempt of a link.
///
/// Invocation problems are reported as `ReportedOutcome::Failure`, never as
/// errors: they feed the retry and escalation policy like any other failure.
pub trait LinkInvoker: Send + Sync {
    fn invoke(
        &self,
        request: &DispatchRequest,
    ) -> impl std::future::Future<Output = ReportedOutcome> + Send;
}

/// Loops dispatch, invoke, `record_outcome` until the engine stops
/// producing dispatches (completion, escalation, pause or a terminal state).
///
/// A success loop via `GoToLink` runs until the re-entered link's
/// `max_retries` is spent; `with_step_limit` bounds how many attempts one
/// `drive` call runs.
pub struct ChainDriver<'a, C: ChainRepository, E: ExecutionRepository, I: LinkInvoker> {
    engine: &'a ChainEngine<C, E>,
    invoker: &'a I,
    step_limit: Option<usize>,
}

impl<'a, C: ChainRepository, E: ExecutionRepository, I: LinkInvoker> ChainDriver<'a, C, E, I> {
    pub fn new(engine: &'a ChainEngine<C, E>, invoker: &'a I) -> Self {
        Self {
            engine,
            invoker,
            step_limit: None,
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Drive from a transition returned by `start`, `resume` or `unpause`.
    pub async fn drive(&self, transition: Transition) -> Result<Transition, EngineError> {
        let mut current = transition;
        let mut steps = 0usize;

        while let Some(request) = current.dispatch.take() {
            if self.step_limit.is_some_and(|limit| steps >= limit) {
                tracing::warn!(
                    execution_id = %request.execution_id,
                    steps,
                    "step limit reached; leaving attempt pending"
                );
                current.dispatch = Some(request);
                break;
            }
            steps += 1;

            tracing::debug!(
                execution_id = %request.execution_id,
                link_id = %request.link_id,
                attempt = request.attempt_number,
                skill = %request.skill,
                "invoking link"
            );
            let outcome = self.invoker.invoke(&request).await;
            let report = OutcomeReport {
                link_id: request.link_id.clone(),
                attempt_number: request.attempt_number,
                outcome,
            };
            current = self
                .engine
                .record_outcome(&request.execution_id, report)
                .await?;
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skillchain_types::chain::{FailureKind, SuccessKind};
    use skillchain_types::execution::{ExecutionStatus, Resolution};
    use std::sync::Mutex;

    use crate::engine::test_support::{chain, engine_with, link};

    /// Fails the named links a fixed number of times, succeeds otherwise.
    struct ScriptedInvoker {
        failures: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedInvoker {
        fn new(failures: &[(&str, u32)]) -> Self {
            Self {
                failures: Mutex::new(
                    failures
                        .iter()
                        .map(|(l, n)| (l.to_string(), *n))
                        .collect(),
                ),
            }
        }
    }

    impl LinkInvoker for ScriptedInvoker {
        async fn invoke(&self, request: &DispatchRequest) -> ReportedOutcome {
            let mut failures = self.failures.lock().unwrap();
            if let Some((_, remaining)) = failures
                .iter_mut()
                .find(|(l, n)| *l == request.link_id && *n > 0)
            {
                *remaining -= 1;
                return ReportedOutcome::Failure {
                    error: format!("{} unavailable", request.skill),
                    escalation_reason: None,
                };
            }
            ReportedOutcome::Success {
                output: json!({ "link": request.link_id, "attempt": request.attempt_number }),
            }
        }
    }

    #[tokio::test]
    async fn drives_to_completion_through_retries() {
        let record = chain("driven", 10, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let invoker = ScriptedInvoker::new(&[("b", 2)]);

        let start = engine.start(&record.id, json!({}), None).await.unwrap();
        let done = ChainDriver::new(&engine, &invoker).drive(start).await.unwrap();

        assert_eq!(done.execution.status, ExecutionStatus::Completed);
        assert_eq!(done.execution.total_failure_count, 2);
        assert_eq!(
            done.execution.execution_context.latest_output("b"),
            Some(&json!({"link": "b", "attempt": 3}))
        );
    }

    #[tokio::test]
    async fn stops_at_escalation_and_continues_after_resume() {
        let mut a = link("a", 0);
        a.on_failure_transition = FailureKind::Escalate;
        let record = chain("driven-escalate", 10, vec![a, link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let invoker = ScriptedInvoker::new(&[("a", 1)]);
        let driver = ChainDriver::new(&engine, &invoker);

        let start = engine.start(&record.id, json!({}), None).await.unwrap();
        let paused = driver.drive(start).await.unwrap();
        assert!(paused.execution.is_awaiting_intervention());

        let resumed = engine
            .resume(&paused.execution.id, Resolution::Retry, None)
            .await
            .unwrap();
        let done = driver.drive(resumed).await.unwrap();
        assert_eq!(done.execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn step_limit_bounds_success_loops() {
        let mut a = link("a", 0);
        a.max_retries = 10;
        a.on_success_transition = SuccessKind::GoToLink;
        a.on_success_target_link_id = Some("a".to_string());
        let record = chain("looping", 10, vec![a]);
        let (engine, _) = engine_with(&record).await;
        let invoker = ScriptedInvoker::new(&[]);

        let start = engine.start(&record.id, json!({}), None).await.unwrap();
        let current = ChainDriver::new(&engine, &invoker)
            .with_step_limit(5)
            .drive(start)
            .await
            .unwrap();

        assert_eq!(current.execution.status, ExecutionStatus::Running);
        assert_eq!(current.dispatch.unwrap().attempt_number, 6);
        assert_eq!(current.execution.execution_context.len(), 5);
    }

    #[tokio::test]
    async fn success_loop_escalates_when_link_budget_is_spent() {
        let mut a = link("a", 0);
        a.on_success_transition = SuccessKind::GoToLink;
        a.on_success_target_link_id = Some("a".to_string());
        let record = chain("bounded-loop", 10, vec![a]);
        let (engine, _) = engine_with(&record).await;
        let invoker = ScriptedInvoker::new(&[]);

        let start = engine.start(&record.id, json!({}), None).await.unwrap();
        let paused = ChainDriver::new(&engine, &invoker).drive(start).await.unwrap();

        assert!(paused.execution.is_awaiting_intervention());
        assert_eq!(paused.execution.total_failure_count, 0);
        assert_eq!(paused.execution.execution_context.len(), 3);
        assert_eq!(
            paused.execution.intervention_reason.as_deref(),
            Some("max retries exceeded on link A")
        );
    }
}
