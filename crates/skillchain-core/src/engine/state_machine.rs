//! The execution state machine.
//!
//! `ChainEngine` is the sole authority that mutates an execution's status,
//! current link and counters. Every call follows the same shape:
//!
//! 1. Take the per-execution lock.
//! 2. Load the execution and its attempt history.
//! 3. Decide the next state (see `transition`).
//! 4. Persist everything the step produced as one versioned write.
//! 5. Publish events and hand back the next dispatch, if any.
//!
//! The engine never invokes skills itself. Each returned `Transition` may
//! carry a `DispatchRequest`; the caller hands it to a link invoker and
//! reports the result through `record_outcome`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use skillchain_types::chain::{ChainId, Link};
use skillchain_types::config::EngineConfig;
use skillchain_types::error::{EngineError, RepositoryError};
use skillchain_types::event::ChainEvent;
use skillchain_types::execution::{
    Checkpoint, ContextEntry, DispatchRequest, Execution, ExecutionContext, ExecutionId,
    ExecutionStatus, LinkExecution, LinkOutcome, OutcomeReport, ReportedOutcome, Transition,
    TransitionTaken,
};
use uuid::Uuid;

use crate::chain::{CompiledChain, compile_chain};
use crate::event::bus::EventBus;
use crate::repository::chain::ChainRepository;
use crate::repository::execution::{AttemptFinalization, ExecutionRepository, ExecutionWrite};

use super::checkpoint::CheckpointManager;
use super::locks::ExecutionLocks;
use super::transition::{AttemptHistory, Decision, TransitionResolver};

/// Runs skill chains against a chain store and an execution store.
pub struct ChainEngine<C: ChainRepository, E: ExecutionRepository> {
    chains: C,
    checkpoints: CheckpointManager<E>,
    events: EventBus,
    pub(super) locks: ExecutionLocks,
    config: EngineConfig,
}

impl<C: ChainRepository, E: ExecutionRepository> ChainEngine<C, E> {
    pub fn new(chains: C, executions: E, events: EventBus, config: EngineConfig) -> Self {
        Self {
            chains,
            checkpoints: CheckpointManager::new(executions),
            events,
            locks: ExecutionLocks::new(),
            config,
        }
    }

    pub fn chains(&self) -> &C {
        &self.chains
    }

    pub fn executions(&self) -> &E {
        self.checkpoints.repo()
    }

    pub fn checkpoints(&self) -> &CheckpointManager<E> {
        &self.checkpoints
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_execution(&self, id: &ExecutionId) -> Result<Execution, EngineError> {
        self.executions()
            .get_execution(id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(*id))
    }

    /// Attempt log of an execution, oldest first.
    pub async fn link_executions(&self, id: &ExecutionId) -> Result<Vec<LinkExecution>, EngineError> {
        self.get_execution(id).await?;
        Ok(self.executions().list_link_executions(id).await?)
    }

    /// Checkpoint log of an execution, in success order.
    pub async fn checkpoint_log(&self, id: &ExecutionId) -> Result<Vec<Checkpoint>, EngineError> {
        self.get_execution(id).await?;
        Ok(self.executions().list_checkpoints(id).await?)
    }

    /// Rebuild an execution's context from its checkpoints.
    pub async fn reconstruct_context(&self, id: &ExecutionId) -> Result<ExecutionContext, EngineError> {
        self.get_execution(id).await?;
        self.checkpoints
            .reconstruct_context(id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Start a new execution of a published chain and dispatch its first
    /// link.
    ///
    /// The chain is compiled before anything is written, so a malformed
    /// definition never produces an execution row.
    pub async fn start(
        &self,
        chain_id: &ChainId,
        input_values: Value,
        started_by: Option<String>,
    ) -> Result<Transition, EngineError> {
        let record = self
            .chains
            .get_chain(chain_id)
            .await?
            .ok_or_else(|| EngineError::ChainNotFound(chain_id.to_string()))?;
        if !record.published {
            return Err(EngineError::ChainNotPublished(record.name));
        }
        if record.links.is_empty() {
            return Err(EngineError::ChainEmpty(record.name));
        }

        let chain = compile_chain(&record)?;
        let first = chain
            .first_link()
            .cloned()
            .ok_or_else(|| EngineError::ChainEmpty(record.name.clone()))?;

        let now = Utc::now();
        let execution = Execution {
            id: ExecutionId::new(),
            chain_id: record.id,
            status: ExecutionStatus::Pending,
            current_link_id: None,
            total_failure_count: 0,
            requires_human_intervention: false,
            intervention_reason: None,
            input_values,
            execution_context: ExecutionContext::new(),
            error: None,
            started_by,
            completed_by: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            version: 0,
            chain: chain.into_snapshot(),
        };

        let mut next = execution;
        next.status = ExecutionStatus::Running;
        next.current_link_id = Some(first.id.clone());
        next.started_at = Some(now);
        next.version += 1;

        // The Pending state is never stored on its own: the execution row
        // and attempt 1 are written together.
        let (attempt, request) = Self::prepare_attempt(&next, &first, 1, Some(now));
        self.executions()
            .create_execution(&next, Some(&attempt))
            .await?;

        tracing::info!(
            execution_id = %next.id,
            chain = %next.chain.name,
            link_id = %first.id,
            "execution started"
        );

        self.publish(vec![
            ChainEvent::ExecutionStarted {
                execution_id: next.id,
                chain_name: next.chain.name.clone(),
                started_by: next.started_by.clone(),
            },
            ChainEvent::LinkDispatched {
                request: request.clone(),
            },
        ]);

        Ok(Transition {
            execution: next,
            applied: true,
            dispatch: Some(request),
        })
    }

    // -----------------------------------------------------------------------
    // record_outcome
    // -----------------------------------------------------------------------

    /// Apply the outcome of the execution's pending attempt.
    ///
    /// Reports for a finished execution are accepted as no-ops: the invoker
    /// may still be running when an execution is cancelled or failed.
    pub async fn record_outcome(
        &self,
        execution_id: &ExecutionId,
        report: OutcomeReport,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        if execution.status.is_terminal() {
            tracing::warn!(
                execution_id = %execution_id,
                status = %execution.status,
                link_id = %report.link_id,
                attempt = report.attempt_number,
                "ignoring outcome reported after execution finished"
            );
            return Ok(Transition::unchanged(execution));
        }

        let attempts = self.executions().list_link_executions(execution_id).await?;
        let history = AttemptHistory::from_attempts(&attempts);
        let pending = history
            .pending()
            .cloned()
            .ok_or(EngineError::NoPendingAttempt(*execution_id))?;
        if pending.link_id != report.link_id || pending.attempt_number != report.attempt_number {
            return Err(EngineError::AttemptMismatch {
                expected_link: pending.link_id,
                expected_attempt: pending.attempt_number,
                actual_link: report.link_id,
                actual_attempt: report.attempt_number,
            });
        }

        let chain = CompiledChain::from_snapshot(execution.chain.clone());
        let link = chain
            .link(&pending.link_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownLink(pending.link_id.clone()))?;

        let now = Utc::now();
        let mut next = execution.clone();
        next.version += 1;
        next.updated_at = now;
        let mut events = Vec::new();

        let (outcome, output, error, checkpoint, decision) = match report.outcome {
            ReportedOutcome::Success { output } => {
                let entry = ContextEntry {
                    link_id: link.id.clone(),
                    attempt_number: pending.attempt_number,
                    output: output.clone(),
                    recorded_at: now,
                };
                next.execution_context.append(entry.clone());
                let checkpoint = CheckpointManager::<E>::build(next.id, &link, entry);

                tracing::debug!(
                    execution_id = %next.id,
                    link_id = %link.id,
                    attempt = pending.attempt_number,
                    "checkpointed link success"
                );
                events.push(ChainEvent::LinkSucceeded {
                    execution_id: next.id,
                    link_id: link.id.clone(),
                    attempt_number: pending.attempt_number,
                });

                let decision = TransitionResolver::on_success(&chain, &link, &history);
                (LinkOutcome::Success, Some(output), None, Some(checkpoint), decision)
            }
            ReportedOutcome::Failure {
                error,
                escalation_reason,
            } => {
                next.total_failure_count += 1;
                let decision = TransitionResolver::on_failure(
                    &chain,
                    &link,
                    pending.attempt_number,
                    next.total_failure_count,
                    escalation_reason.as_deref(),
                    &history,
                );

                tracing::info!(
                    execution_id = %next.id,
                    link_id = %link.id,
                    attempt = pending.attempt_number,
                    total_failures = next.total_failure_count,
                    error = %error,
                    "link attempt failed"
                );
                events.push(ChainEvent::LinkFailed {
                    execution_id: next.id,
                    link_id: link.id.clone(),
                    attempt_number: pending.attempt_number,
                    error: error.clone(),
                    total_failure_count: next.total_failure_count,
                    will_retry: matches!(decision, Decision::Dispatch { .. }),
                });

                (LinkOutcome::Failure, None, Some(error), None, decision)
            }
        };

        let mut new_attempt = None;
        let mut dispatch = None;
        // Only a success grows the context.
        let oversized = (outcome == LinkOutcome::Success)
            .then(|| context_size(&next.execution_context))
            .filter(|bytes| *bytes > self.config.max_context_bytes);

        let transition_taken = if let Some(context_bytes) = oversized {
            let message = format!(
                "execution context is {context_bytes} bytes, exceeding the limit of {} bytes",
                self.config.max_context_bytes
            );
            tracing::warn!(execution_id = %next.id, context_bytes, "execution context too large");
            Self::finish(&mut next, ExecutionStatus::Failed, None, now);
            next.error = Some(message.clone());
            events.push(ChainEvent::ExecutionFailed {
                execution_id: next.id,
                error: message,
            });
            TransitionTaken::Abandoned
        } else {
            match &decision {
                Decision::Dispatch {
                    link_id,
                    attempt_number,
                    ..
                } => {
                    let target = chain
                        .link(link_id)
                        .ok_or_else(|| EngineError::UnknownLink(link_id.clone()))?;
                    next.current_link_id = Some(link_id.clone());

                    // An operator pause holds the attempt back until unpause.
                    let dispatched_at = (next.status == ExecutionStatus::Running).then_some(now);
                    let (attempt, request) =
                        Self::prepare_attempt(&next, target, *attempt_number, dispatched_at);
                    if dispatched_at.is_some() {
                        events.push(ChainEvent::LinkDispatched {
                            request: request.clone(),
                        });
                        dispatch = Some(request);
                    }
                    new_attempt = Some(attempt);
                }
                Decision::Complete => {
                    Self::finish(&mut next, ExecutionStatus::Completed, None, now);
                    tracing::info!(execution_id = %next.id, "execution completed");
                    events.push(ChainEvent::ExecutionCompleted {
                        execution_id: next.id,
                        links_succeeded: next.execution_context.len(),
                    });
                }
                Decision::Escalate {
                    link_id,
                    cause,
                    reason,
                } => {
                    next.status = ExecutionStatus::Paused;
                    next.requires_human_intervention = true;
                    next.intervention_reason = Some(reason.clone());
                    next.current_link_id = Some(link_id.clone());
                    tracing::info!(
                        execution_id = %next.id,
                        link_id = %link_id,
                        reason = %reason,
                        "execution escalated for intervention"
                    );
                    events.push(ChainEvent::ExecutionEscalated {
                        execution_id: next.id,
                        link_id: link_id.clone(),
                        cause: *cause,
                        reason: reason.clone(),
                    });
                }
            }
            decision.transition_taken()
        };

        let write = ExecutionWrite {
            execution: next.clone(),
            expected_version: execution.version,
            finalize_attempt: Some(AttemptFinalization {
                attempt_id: pending.id,
                outcome,
                output,
                error,
                transition_taken,
                finished_at: now,
            }),
            checkpoint,
            new_attempt,
            mark_dispatched: None,
        };
        self.persist(&write).await?;
        self.publish(events);

        Ok(Transition {
            execution: next,
            applied: true,
            dispatch,
        })
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Build the request an invoker receives for one attempt.
    pub(super) fn dispatch_request(
        execution: &Execution,
        link: &Link,
        attempt_number: u32,
    ) -> DispatchRequest {
        DispatchRequest {
            execution_id: execution.id,
            chain_id: execution.chain_id,
            link_id: link.id.clone(),
            link_name: link.name.clone(),
            skill: link.skill.clone(),
            agent: link.agent.clone(),
            attempt_number,
            input_values: execution.input_values.clone(),
            context: execution
                .execution_context
                .invoker_view(&execution.input_values),
        }
    }

    /// Create the pending attempt row and its dispatch request.
    pub(super) fn prepare_attempt(
        execution: &Execution,
        link: &Link,
        attempt_number: u32,
        dispatched_at: Option<DateTime<Utc>>,
    ) -> (LinkExecution, DispatchRequest) {
        let request = Self::dispatch_request(execution, link, attempt_number);
        let attempt = LinkExecution {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            link_id: link.id.clone(),
            attempt_number,
            outcome: LinkOutcome::Pending,
            input: request.context.clone(),
            output: None,
            error: None,
            transition_taken: None,
            dispatched_at,
            created_at: Utc::now(),
            finished_at: None,
        };
        (attempt, request)
    }

    /// Move an execution into a terminal status.
    pub(super) fn finish(
        execution: &mut Execution,
        status: ExecutionStatus,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) {
        execution.status = status;
        execution.current_link_id = None;
        execution.requires_human_intervention = false;
        execution.completed_at = Some(now);
        execution.completed_by = actor;
        execution.updated_at = now;
    }

    pub(super) async fn persist(&self, write: &ExecutionWrite) -> Result<(), EngineError> {
        match self.executions().apply_write(write).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Conflict(detail)) => {
                tracing::warn!(
                    execution_id = %write.execution.id,
                    detail = %detail,
                    "concurrent modification detected"
                );
                Err(EngineError::ConcurrentModification(write.execution.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn publish(&self, events: Vec<ChainEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }
}

fn context_size(context: &ExecutionContext) -> usize {
    serde_json::to_vec(context).map_or(usize::MAX, |bytes| bytes.len())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use skillchain_types::chain::{FailureKind, SuccessKind};
    use skillchain_types::config::EngineConfig;
    use skillchain_types::error::{DefinitionError, EngineError};
    use skillchain_types::execution::{
        EscalationCause, ExecutionStatus, LinkOutcome, OutcomeReport, TransitionTaken,
    };

    use super::ChainEngine;
    use crate::engine::test_support::{InMemoryChains, chain, engine_with, engine_with_config, link};
    use crate::event::bus::EventBus;
    use crate::repository::chain::ChainRepository;
    use crate::repository::execution::ExecutionRepository;

    #[tokio::test]
    async fn start_dispatches_first_link() {
        let record = chain("three-step", 5, vec![link("a", 0), link("b", 1), link("c", 2)]);
        let (engine, _) = engine_with(&record).await;
        let mut rx = engine.events().subscribe();

        let t = engine
            .start(&record.id, json!({"ticket": 7}), Some("alice".to_string()))
            .await
            .unwrap();

        assert!(t.applied);
        assert_eq!(t.execution.status, ExecutionStatus::Running);
        assert_eq!(t.execution.current_link_id.as_deref(), Some("a"));
        assert_eq!(t.execution.version, 1);
        let request = t.dispatch.unwrap();
        assert_eq!(request.link_id, "a");
        assert_eq!(request.attempt_number, 1);
        assert_eq!(request.skill, "a-skill");
        assert_eq!(request.context["inputs"]["ticket"], 7);

        let stored = engine.get_execution(&t.execution.id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Running);
        assert_eq!(stored.version, 1);

        let attempts = engine.link_executions(&t.execution.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, LinkOutcome::Pending);
        assert!(attempts[0].dispatched_at.is_some());

        assert!(matches!(
            rx.recv().await.unwrap(),
            skillchain_types::event::ChainEvent::ExecutionStarted { .. }
        ));
    }

    #[tokio::test]
    async fn start_rejects_unknown_unpublished_and_malformed_chains() {
        let mut record = chain("draft-only", 5, vec![link("a", 0)]);
        record.published = false;
        let (engine, executions) = engine_with(&record).await;

        let err = engine
            .start(&skillchain_types::chain::ChainId::new(), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ChainNotFound(_)));

        let err = engine.start(&record.id, json!({}), None).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainNotPublished(_)));

        let mut empty = chain("empty", 5, vec![]);
        empty.published = true;
        engine.chains().save_chain(&empty).await.unwrap();
        let err = engine.start(&empty.id, json!({}), None).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainEmpty(_)));

        // GoToLink without a target is rejected before any dispatch.
        let mut a = link("a", 0);
        a.on_success_transition = SuccessKind::GoToLink;
        let broken = chain("broken", 5, vec![a]);
        engine.chains().save_chain(&broken).await.unwrap();
        let err = engine.start(&broken.id, json!({}), None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Definition(DefinitionError::MissingTarget { .. })
        ));

        let all = executions.list_executions(None, None, 100).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn happy_path_completes_with_checkpoints_in_order() {
        let record = chain("linear", 5, vec![link("a", 0), link("b", 1), link("c", 2)]);
        let (engine, _) = engine_with(&record).await;
        let t = engine.start(&record.id, json!({}), None).await.unwrap();
        let id = t.execution.id;

        let mut dispatch = t.dispatch;
        while let Some(request) = dispatch {
            let output = json!({ "from": request.link_id });
            let t = engine
                .record_outcome(
                    &id,
                    OutcomeReport::success(&request.link_id, request.attempt_number, output),
                )
                .await
                .unwrap();
            dispatch = t.dispatch;
        }

        let execution = engine.get_execution(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.current_link_id.is_none());
        assert!(execution.completed_at.is_some());
        assert_eq!(execution.execution_context.len(), 3);

        let checkpoints = engine.checkpoint_log(&id).await.unwrap();
        let order: Vec<_> = checkpoints.iter().map(|c| c.link_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(checkpoints[1].position, 1);

        let rebuilt = engine.reconstruct_context(&id).await.unwrap();
        assert_eq!(rebuilt, execution.execution_context);

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(
            attempts[2].transition_taken,
            Some(TransitionTaken::Complete)
        );
    }

    #[tokio::test]
    async fn retry_budget_forces_escalation() {
        // A retries on failure with a budget of two attempts; the chain allows five failures.
        let mut a = link("a", 0);
        a.max_retries = 2;
        let mut b = link("b", 1);
        b.on_success_transition = SuccessKind::Complete;
        let record = chain("retry-budget", 5, vec![a, b]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "boom"))
            .await
            .unwrap();
        let next = t.dispatch.unwrap();
        assert_eq!(next.link_id, "a");
        assert_eq!(next.attempt_number, 2);

        let t = engine
            .record_outcome(&id, OutcomeReport::failure("a", 2, "boom"))
            .await
            .unwrap();

        assert!(t.dispatch.is_none());
        let execution = t.execution;
        assert_eq!(execution.status, ExecutionStatus::Paused);
        assert!(execution.requires_human_intervention);
        assert_eq!(execution.total_failure_count, 2);
        assert_eq!(
            execution.intervention_reason.as_deref(),
            Some("max retries exceeded on link A")
        );

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.attempt_number <= 2));
        assert_eq!(
            attempts[1].transition_taken,
            Some(TransitionTaken::Escalate {
                cause: EscalationCause::MaxRetriesExceeded
            })
        );
    }

    #[tokio::test]
    async fn success_go_to_link_skips_middle_link() {
        // A jumps to C on success; B never gets an attempt.
        let mut a = link("a", 0);
        a.on_success_transition = SuccessKind::GoToLink;
        a.on_success_target_link_id = Some("c".to_string());
        let mut c = link("c", 2);
        c.on_success_transition = SuccessKind::Complete;
        let record = chain("shortcut", 5, vec![a, link("b", 1), c]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({"route": "c"})))
            .await
            .unwrap();
        assert_eq!(t.execution.current_link_id.as_deref(), Some("c"));
        let request = t.dispatch.unwrap();
        assert_eq!(request.link_id, "c");
        assert_eq!(request.attempt_number, 1);

        let t = engine
            .record_outcome(&id, OutcomeReport::success("c", 1, json!({})))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Completed);

        let attempts = engine.link_executions(&id).await.unwrap();
        assert!(attempts.iter().all(|a| a.link_id != "b"));
        let order: Vec<_> = engine
            .checkpoint_log(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.link_id)
            .collect();
        assert_eq!(order, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn re_entering_spent_link_escalates_on_it() {
        // A and B bounce between each other on success; B allows one attempt.
        let mut a = link("a", 0);
        a.max_retries = 5;
        a.on_success_transition = SuccessKind::GoToLink;
        a.on_success_target_link_id = Some("b".to_string());
        let mut b = link("b", 1);
        b.max_retries = 1;
        b.on_success_transition = SuccessKind::GoToLink;
        b.on_success_target_link_id = Some("a".to_string());
        let record = chain("ping-pong", 5, vec![a, b]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        for (link_id, attempt) in [("a", 1), ("b", 1)] {
            let t = engine
                .record_outcome(&id, OutcomeReport::success(link_id, attempt, json!({})))
                .await
                .unwrap();
            assert!(t.dispatch.is_some());
        }
        let t = engine
            .record_outcome(&id, OutcomeReport::success("a", 2, json!({})))
            .await
            .unwrap();

        assert!(t.dispatch.is_none());
        assert!(t.execution.is_awaiting_intervention());
        assert_eq!(t.execution.current_link_id.as_deref(), Some("b"));
        assert_eq!(t.execution.total_failure_count, 0);
        assert_eq!(
            t.execution.intervention_reason.as_deref(),
            Some("max retries exceeded on link B")
        );

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts.iter().filter(|a| a.link_id == "b").count(), 1);
        assert_eq!(
            attempts.last().unwrap().transition_taken,
            Some(TransitionTaken::Escalate {
                cause: EscalationCause::MaxRetriesExceeded
            })
        );
        assert_eq!(engine.checkpoint_log(&id).await.unwrap().len(), 3);

        // An operator retry may go past the budget.
        let resumed = engine
            .resume(&id, skillchain_types::execution::Resolution::Retry, None)
            .await
            .unwrap();
        let request = resumed.dispatch.unwrap();
        assert_eq!(request.link_id, "b");
        assert_eq!(request.attempt_number, 2);
    }

    #[tokio::test]
    async fn failure_go_to_link_skips_middle_link() {
        // A fails and jumps to C; B never runs.
        let mut a = link("a", 0);
        a.on_failure_transition = FailureKind::GoToLink;
        a.on_failure_target_link_id = Some("c".to_string());
        let record = chain("fallback", 10, vec![a, link("b", 1), link("c", 2)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "no data"))
            .await
            .unwrap();
        let request = t.dispatch.unwrap();
        assert_eq!(request.link_id, "c");
        assert_eq!(request.attempt_number, 1);

        let t = engine
            .record_outcome(&id, OutcomeReport::success("c", 1, json!({"done": true})))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Completed);
        assert_eq!(t.execution.total_failure_count, 1);

        let attempts = engine.link_executions(&id).await.unwrap();
        assert!(attempts.iter().all(|a| a.link_id != "b"));
        let checkpoints = engine.checkpoint_log(&id).await.unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].link_id, "c");
    }

    #[tokio::test]
    async fn chain_budget_of_one_escalates_on_first_failure() {
        let record = chain("tight-budget", 1, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "boom"))
            .await
            .unwrap();
        assert!(t.execution.is_awaiting_intervention());
        assert_eq!(
            t.execution.intervention_reason.as_deref(),
            Some("chain-wide failure budget exceeded")
        );
    }

    #[tokio::test]
    async fn total_failures_count_every_failure_across_links() {
        let mut a = link("a", 0);
        a.max_retries = 10;
        a.on_failure_transition = FailureKind::GoToLink;
        a.on_failure_target_link_id = Some("b".to_string());
        let mut b = link("b", 1);
        b.max_retries = 10;
        b.on_failure_transition = FailureKind::GoToLink;
        b.on_failure_target_link_id = Some("a".to_string());
        let record = chain("ping-pong", 100, vec![a, b]);
        let (engine, _) = engine_with(&record).await;
        let t = engine.start(&record.id, json!({}), None).await.unwrap();
        let id = t.execution.id;

        let mut request = t.dispatch.unwrap();
        for _ in 0..7 {
            let t = engine
                .record_outcome(
                    &id,
                    OutcomeReport::failure(&request.link_id, request.attempt_number, "nope"),
                )
                .await
                .unwrap();
            request = t.dispatch.unwrap();
        }

        let execution = engine.get_execution(&id).await.unwrap();
        assert_eq!(execution.total_failure_count, 7);
        // Numbering is cumulative per link across GoToLink loops.
        assert_eq!(request.link_id, "b");
        assert_eq!(request.attempt_number, 4);
    }

    #[tokio::test]
    async fn success_loop_appends_context_entries() {
        let mut a = link("a", 0);
        a.on_success_transition = SuccessKind::GoToLink;
        a.on_success_target_link_id = Some("b".to_string());
        let mut b = link("b", 1);
        b.on_success_transition = SuccessKind::Complete;
        let record = chain("loop", 5, vec![a, b]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({"n": 1})))
            .await
            .unwrap();
        let t = engine
            .record_outcome(&id, OutcomeReport::success("b", 1, json!({"n": 2})))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Completed);
        assert_eq!(t.execution.execution_context.len(), 2);
    }

    #[tokio::test]
    async fn mismatched_and_unexpected_reports_are_rejected() {
        let record = chain("protocol", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let err = engine
            .record_outcome(&id, OutcomeReport::success("b", 1, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AttemptMismatch { .. }));

        let err = engine
            .record_outcome(&id, OutcomeReport::success("a", 2, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AttemptMismatch {
                expected_attempt: 1,
                actual_attempt: 2,
                ..
            }
        ));

        // Escalated executions have no pending attempt.
        let mut tight = chain("tight", 1, vec![link("a", 0)]);
        tight.published = true;
        engine.chains().save_chain(&tight).await.unwrap();
        let other = engine.start(&tight.id, json!({}), None).await.unwrap().execution.id;
        engine
            .record_outcome(&other, OutcomeReport::failure("a", 1, "x"))
            .await
            .unwrap();
        let err = engine
            .record_outcome(&other, OutcomeReport::failure("a", 1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoPendingAttempt(_)));

        let err = engine
            .record_outcome(
                &skillchain_types::execution::ExecutionId::new(),
                OutcomeReport::success("a", 1, json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn oversized_context_fails_execution() {
        let record = chain("big-output", 5, vec![link("a", 0), link("b", 1)]);
        let config = EngineConfig {
            max_context_bytes: 64,
            ..EngineConfig::default()
        };
        let (engine, _) = engine_with_config(&record, config).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({"blob": "x".repeat(200)})))
            .await
            .unwrap();
        assert!(t.dispatch.is_none());
        assert_eq!(t.execution.status, ExecutionStatus::Failed);
        assert!(t.execution.error.unwrap().contains("exceeding the limit"));

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts[0].outcome, LinkOutcome::Success);
        assert_eq!(attempts[0].transition_taken, Some(TransitionTaken::Abandoned));
    }

    #[tokio::test]
    async fn failure_ignores_context_limit() {
        let record = chain("limit-lowered", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, executions) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;
        engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({"blob": "x".repeat(200)})))
            .await
            .unwrap();

        // Same store, restarted with a limit the context already exceeds.
        let chains = InMemoryChains::default();
        chains.save_chain(&record).await.unwrap();
        let config = EngineConfig {
            max_context_bytes: 64,
            ..EngineConfig::default()
        };
        let strict = ChainEngine::new(chains, executions, EventBus::new(8), config);

        let t = strict
            .record_outcome(&id, OutcomeReport::failure("b", 1, "flaky"))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Running);
        assert_eq!(t.execution.total_failure_count, 1);
        let request = t.dispatch.unwrap();
        assert_eq!((request.link_id.as_str(), request.attempt_number), ("b", 2));
    }

    #[tokio::test]
    async fn stale_write_is_a_concurrent_modification() {
        let record = chain("race", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, executions) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        executions.interfere_once();
        let err = engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentModification(_)));

        // Nothing from the losing write landed.
        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, LinkOutcome::Pending);
        assert!(engine.checkpoint_log(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_duplicate_reports_apply_once() {
        let record = chain("dupes", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let engine = std::sync::Arc::new(engine);
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .record_outcome(&id, OutcomeReport::success("a", 1, json!({})))
                    .await
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(engine.checkpoint_log(&id).await.unwrap().len(), 1);
        let execution = engine.get_execution(&id).await.unwrap();
        assert_eq!(execution.current_link_id.as_deref(), Some("b"));
    }
}
