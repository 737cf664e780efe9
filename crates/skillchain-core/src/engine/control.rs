//! Operator commands: pause, unpause, resume, cancel, fail.
//!
//! Each command is idempotent where its target state is already reached:
//! pausing a paused execution or cancelling a cancelled one returns the
//! execution unchanged with `applied = false`.

use chrono::Utc;
use skillchain_types::error::EngineError;
use skillchain_types::event::ChainEvent;
use skillchain_types::execution::{
    Execution, ExecutionId, ExecutionStatus, LinkOutcome, Resolution, Transition, TransitionTaken,
};

use crate::chain::CompiledChain;
use crate::repository::chain::ChainRepository;
use crate::repository::execution::{AttemptFinalization, ExecutionRepository, ExecutionWrite};

use super::state_machine::ChainEngine;
use super::transition::AttemptHistory;

impl<C: ChainRepository, E: ExecutionRepository> ChainEngine<C, E> {
    /// Pause a running execution.
    ///
    /// The in-flight attempt stays pending. If its outcome arrives while
    /// paused it is applied, but the follow-up attempt is held back until
    /// `unpause`.
    pub async fn pause(
        &self,
        execution_id: &ExecutionId,
        actor: Option<String>,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        match execution.status {
            ExecutionStatus::Running => {}
            ExecutionStatus::Paused => return Ok(Transition::unchanged(execution)),
            status => {
                return Err(EngineError::InvalidState {
                    operation: "pause",
                    status,
                });
            }
        }

        let mut next = execution.clone();
        next.status = ExecutionStatus::Paused;
        next.version += 1;
        next.updated_at = Utc::now();
        self.persist(&ExecutionWrite::execution_only(next.clone(), execution.version))
            .await?;

        tracing::info!(execution_id = %execution_id, actor = ?actor, "execution paused");
        self.publish(vec![ChainEvent::ExecutionPaused {
            execution_id: *execution_id,
            actor,
        }]);

        Ok(Transition {
            execution: next,
            applied: true,
            dispatch: None,
        })
    }

    /// Lift an operator pause and dispatch whatever attempt was held back.
    ///
    /// Executions paused for intervention must go through `resume`.
    pub async fn unpause(
        &self,
        execution_id: &ExecutionId,
        actor: Option<String>,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        match execution.status {
            ExecutionStatus::Running => return Ok(Transition::unchanged(execution)),
            ExecutionStatus::Paused if execution.requires_human_intervention => {
                return Err(EngineError::InterventionRequired(*execution_id));
            }
            ExecutionStatus::Paused => {}
            status => {
                return Err(EngineError::InvalidState {
                    operation: "unpause",
                    status,
                });
            }
        }

        let attempts = self.executions().list_link_executions(execution_id).await?;
        let history = AttemptHistory::from_attempts(&attempts);
        let chain = CompiledChain::from_snapshot(execution.chain.clone());

        let now = Utc::now();
        let mut next = execution.clone();
        next.status = ExecutionStatus::Running;
        next.version += 1;
        next.updated_at = now;
        let mut write = ExecutionWrite::execution_only(next.clone(), execution.version);

        let dispatch = match history.pending() {
            // Still with the invoker; its report will arrive normally.
            Some(pending) if pending.dispatched_at.is_some() => None,
            Some(pending) => {
                let link = chain
                    .link(&pending.link_id)
                    .ok_or_else(|| EngineError::UnknownLink(pending.link_id.clone()))?;
                write.mark_dispatched = Some((pending.id, now));
                Some(Self::dispatch_request(&next, link, pending.attempt_number))
            }
            None => {
                let link_id = next
                    .current_link_id
                    .clone()
                    .ok_or(EngineError::NoPendingAttempt(*execution_id))?;
                let link = chain
                    .link(&link_id)
                    .ok_or_else(|| EngineError::UnknownLink(link_id.clone()))?;
                let (attempt, request) =
                    Self::prepare_attempt(&next, link, history.next_attempt(&link_id), Some(now));
                write.new_attempt = Some(attempt);
                Some(request)
            }
        };
        self.persist(&write).await?;

        tracing::info!(execution_id = %execution_id, actor = ?actor, "execution unpaused");
        let mut events = vec![ChainEvent::ExecutionResumed {
            execution_id: *execution_id,
            link_id: next.current_link_id.clone().unwrap_or_default(),
            actor,
        }];
        if let Some(request) = &dispatch {
            events.push(ChainEvent::LinkDispatched {
                request: request.clone(),
            });
        }
        self.publish(events);

        Ok(Transition {
            execution: next,
            applied: true,
            dispatch,
        })
    }

    /// Clear an intervention with an operator decision.
    ///
    /// Attempt numbers are never reset: a retried link continues from its
    /// last attempt number.
    pub async fn resume(
        &self,
        execution_id: &ExecutionId,
        resolution: Resolution,
        actor: Option<String>,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        if !execution.is_awaiting_intervention() {
            return Err(EngineError::NotPendingIntervention {
                status: execution.status,
                requires_human_intervention: execution.requires_human_intervention,
            });
        }

        let chain = CompiledChain::from_snapshot(execution.chain.clone());
        let link = match &resolution {
            Resolution::Cancel => {
                return self
                    .terminate(execution, ExecutionStatus::Cancelled, actor, None)
                    .await;
            }
            Resolution::Retry => {
                let link_id = execution.current_link_id.as_deref().ok_or(
                    EngineError::InvalidState {
                        operation: "resume",
                        status: execution.status,
                    },
                )?;
                chain
                    .link(link_id)
                    .ok_or_else(|| EngineError::UnknownLink(link_id.to_string()))?
            }
            Resolution::Skip { link_id } => chain
                .link(link_id)
                .ok_or_else(|| EngineError::UnknownLink(link_id.clone()))?,
        };

        let consistent = self
            .checkpoints()
            .verify_context(&execution)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        if !consistent {
            tracing::warn!(
                execution_id = %execution_id,
                "persisted context disagrees with checkpoint log"
            );
        }
        let succeeded = self
            .checkpoints()
            .succeeded_links(execution_id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let attempts = self.executions().list_link_executions(execution_id).await?;
        let history = AttemptHistory::from_attempts(&attempts);
        let attempt_number = history.next_attempt(&link.id);

        let now = Utc::now();
        let mut next = execution.clone();
        next.status = ExecutionStatus::Running;
        next.requires_human_intervention = false;
        next.intervention_reason = None;
        next.current_link_id = Some(link.id.clone());
        next.version += 1;
        next.updated_at = now;

        let (attempt, request) = Self::prepare_attempt(&next, link, attempt_number, Some(now));
        let mut write = ExecutionWrite::execution_only(next.clone(), execution.version);
        write.new_attempt = Some(attempt);
        self.persist(&write).await?;

        tracing::info!(
            execution_id = %execution_id,
            link_id = %link.id,
            attempt = attempt_number,
            resolution = ?resolution,
            actor = ?actor,
            succeeded = ?succeeded,
            "execution resumed after intervention"
        );
        self.publish(vec![
            ChainEvent::ExecutionResumed {
                execution_id: *execution_id,
                link_id: link.id.clone(),
                actor,
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

    /// Cancel an execution from any non-terminal status.
    pub async fn cancel(
        &self,
        execution_id: &ExecutionId,
        actor: Option<String>,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        match execution.status {
            ExecutionStatus::Cancelled => Ok(Transition::unchanged(execution)),
            status @ (ExecutionStatus::Completed | ExecutionStatus::Failed) => {
                Err(EngineError::InvalidState {
                    operation: "cancel",
                    status,
                })
            }
            _ => {
                self.terminate(execution, ExecutionStatus::Cancelled, actor, None)
                    .await
            }
        }
    }

    /// Mark an execution as unrecoverably failed.
    ///
    /// This is not the normal failure path; link failures are reported
    /// through `record_outcome`.
    pub async fn fail(
        &self,
        execution_id: &ExecutionId,
        reason: String,
        actor: Option<String>,
    ) -> Result<Transition, EngineError> {
        let _guard = self.locks.acquire(*execution_id).await;
        let execution = self.get_execution(execution_id).await?;

        match execution.status {
            ExecutionStatus::Failed => Ok(Transition::unchanged(execution)),
            status @ (ExecutionStatus::Completed | ExecutionStatus::Cancelled) => {
                Err(EngineError::InvalidState {
                    operation: "fail",
                    status,
                })
            }
            _ => {
                self.terminate(execution, ExecutionStatus::Failed, actor, Some(reason))
                    .await
            }
        }
    }

    /// Close the pending attempt (if any) and move to a terminal status.
    /// Callers hold the execution lock.
    async fn terminate(
        &self,
        execution: Execution,
        status: ExecutionStatus,
        actor: Option<String>,
        error: Option<String>,
    ) -> Result<Transition, EngineError> {
        let attempts = self.executions().list_link_executions(&execution.id).await?;
        let history = AttemptHistory::from_attempts(&attempts);

        let now = Utc::now();
        let mut next = execution.clone();
        Self::finish(&mut next, status, actor.clone(), now);
        next.error = error.clone();
        next.version += 1;

        let mut write = ExecutionWrite::execution_only(next.clone(), execution.version);
        write.finalize_attempt = history.pending().map(|pending| AttemptFinalization {
            attempt_id: pending.id,
            outcome: LinkOutcome::Skipped,
            output: None,
            error: None,
            transition_taken: TransitionTaken::Abandoned,
            finished_at: now,
        });
        self.persist(&write).await?;

        let event = match error {
            Some(error) => {
                tracing::info!(execution_id = %next.id, error = %error, "execution failed");
                ChainEvent::ExecutionFailed {
                    execution_id: next.id,
                    error,
                }
            }
            None => {
                tracing::info!(execution_id = %next.id, actor = ?actor, "execution cancelled");
                ChainEvent::ExecutionCancelled {
                    execution_id: next.id,
                    actor,
                }
            }
        };
        self.publish(vec![event]);

        Ok(Transition {
            execution: next,
            applied: true,
            dispatch: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use skillchain_types::chain::ChainId;
    use skillchain_types::error::EngineError;
    use skillchain_types::execution::{
        ExecutionId, ExecutionStatus, LinkOutcome, OutcomeReport, Resolution, TransitionTaken,
    };

    use crate::engine::test_support::{TestEngine, chain, engine_with, link};

    /// Start `chain_id` and fail its first attempt under a budget of one.
    async fn escalated(engine: &TestEngine, chain_id: &ChainId) -> ExecutionId {
        let id = engine.start(chain_id, json!({}), None).await.unwrap().execution.id;
        engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "boom"))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn resume_retry_continues_attempt_numbering() {
        let record = chain("resume-retry", 1, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let id = escalated(&engine, &record.id).await;

        let t = engine
            .resume(&id, Resolution::Retry, Some("ops".to_string()))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Running);
        assert!(!t.execution.requires_human_intervention);
        assert!(t.execution.intervention_reason.is_none());
        let request = t.dispatch.unwrap();
        assert_eq!(request.link_id, "a");
        assert_eq!(request.attempt_number, 2);
        // The failure budget is never refunded.
        assert_eq!(t.execution.total_failure_count, 1);
    }

    #[tokio::test]
    async fn resume_skip_moves_to_chosen_link() {
        let record = chain("resume-skip", 1, vec![link("a", 0), link("b", 1), link("c", 2)]);
        let (engine, _) = engine_with(&record).await;
        let id = escalated(&engine, &record.id).await;

        let err = engine
            .resume(
                &id,
                Resolution::Skip {
                    link_id: "ghost".to_string(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownLink(ref l) if l == "ghost"));

        let t = engine
            .resume(
                &id,
                Resolution::Skip {
                    link_id: "c".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(t.execution.current_link_id.as_deref(), Some("c"));
        assert_eq!(t.dispatch.unwrap().attempt_number, 1);

        let t = engine
            .record_outcome(&id, OutcomeReport::success("c", 1, json!({})))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Completed);
        let attempts = engine.link_executions(&id).await.unwrap();
        assert!(attempts.iter().all(|a| a.link_id != "b"));
    }

    #[tokio::test]
    async fn resume_cancel_records_actor() {
        let record = chain("resume-cancel", 1, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = escalated(&engine, &record.id).await;

        let t = engine
            .resume(&id, Resolution::Cancel, Some("ops".to_string()))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Cancelled);
        assert_eq!(t.execution.completed_by.as_deref(), Some("ops"));
        assert!(t.execution.current_link_id.is_none());
    }

    #[tokio::test]
    async fn resume_requires_intervention() {
        let record = chain("no-intervention", 5, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let err = engine.resume(&id, Resolution::Retry, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotPendingIntervention {
                status: ExecutionStatus::Running,
                requires_human_intervention: false
            }
        ));

        engine.pause(&id, None).await.unwrap();
        let err = engine.resume(&id, Resolution::Retry, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NotPendingIntervention { .. }));
    }

    #[tokio::test]
    async fn cancel_turns_late_reports_into_no_ops() {
        let record = chain("cancel", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine.cancel(&id, Some("ops".to_string())).await.unwrap();
        assert!(t.applied);
        assert_eq!(t.execution.status, ExecutionStatus::Cancelled);

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts[0].outcome, LinkOutcome::Skipped);
        assert_eq!(attempts[0].transition_taken, Some(TransitionTaken::Abandoned));

        let late = engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({})))
            .await
            .unwrap();
        assert!(!late.applied);
        assert!(late.dispatch.is_none());
        assert_eq!(late.execution.version, t.execution.version);
        assert!(engine.checkpoint_log(&id).await.unwrap().is_empty());

        let again = engine.cancel(&id, None).await.unwrap();
        assert!(!again.applied);
    }

    #[tokio::test]
    async fn cancel_and_fail_reject_other_terminal_states() {
        let record = chain("terminal", 5, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;
        engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({})))
            .await
            .unwrap();

        let err = engine.cancel(&id, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                operation: "cancel",
                status: ExecutionStatus::Completed
            }
        ));
        let err = engine.fail(&id, "watchdog".to_string(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { operation: "fail", .. }));
    }

    #[tokio::test]
    async fn fail_closes_pending_attempt() {
        let record = chain("fail", 5, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine
            .fail(&id, "invoker unreachable".to_string(), Some("watchdog".to_string()))
            .await
            .unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Failed);
        assert_eq!(t.execution.error.as_deref(), Some("invoker unreachable"));
        assert!(!engine.fail(&id, "again".to_string(), None).await.unwrap().applied);

        let attempts = engine.link_executions(&id).await.unwrap();
        assert_eq!(attempts[0].outcome, LinkOutcome::Skipped);

        let late = engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "late"))
            .await
            .unwrap();
        assert!(!late.applied);
        assert_eq!(late.execution.total_failure_count, 0);
    }

    #[tokio::test]
    async fn pause_holds_next_attempt_until_unpause() {
        let record = chain("pause", 5, vec![link("a", 0), link("b", 1)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        let t = engine.pause(&id, Some("ops".to_string())).await.unwrap();
        assert!(t.execution.is_operator_paused());
        assert!(!engine.pause(&id, None).await.unwrap().applied);

        // The in-flight attempt still reports; the next one is held back.
        let t = engine
            .record_outcome(&id, OutcomeReport::success("a", 1, json!({})))
            .await
            .unwrap();
        assert!(t.dispatch.is_none());
        assert_eq!(t.execution.status, ExecutionStatus::Paused);
        assert_eq!(t.execution.current_link_id.as_deref(), Some("b"));
        let attempts = engine.link_executions(&id).await.unwrap();
        assert!(attempts[1].dispatched_at.is_none());

        let t = engine.unpause(&id, None).await.unwrap();
        assert_eq!(t.execution.status, ExecutionStatus::Running);
        let request = t.dispatch.unwrap();
        assert_eq!(request.link_id, "b");
        assert_eq!(request.attempt_number, 1);
        let attempts = engine.link_executions(&id).await.unwrap();
        assert!(attempts[1].dispatched_at.is_some());

        assert!(!engine.unpause(&id, None).await.unwrap().applied);
    }

    #[tokio::test]
    async fn unpause_without_report_does_not_redispatch() {
        let record = chain("pause-inflight", 5, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        engine.pause(&id, None).await.unwrap();
        let t = engine.unpause(&id, None).await.unwrap();
        assert!(t.applied);
        assert!(t.dispatch.is_none());
    }

    #[tokio::test]
    async fn unpause_refuses_escalated_execution() {
        let record = chain("escalated-unpause", 1, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = escalated(&engine, &record.id).await;

        let err = engine.unpause(&id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InterventionRequired(_)));
        let paused = engine.pause(&id, None).await.unwrap();
        assert!(!paused.applied);
    }

    #[tokio::test]
    async fn escalation_while_operator_paused_requires_intervention() {
        let record = chain("pause-then-fail", 1, vec![link("a", 0)]);
        let (engine, _) = engine_with(&record).await;
        let id = engine.start(&record.id, json!({}), None).await.unwrap().execution.id;

        engine.pause(&id, None).await.unwrap();
        let t = engine
            .record_outcome(&id, OutcomeReport::failure("a", 1, "boom"))
            .await
            .unwrap();
        assert!(t.execution.is_awaiting_intervention());
        assert!(engine.resume(&id, Resolution::Retry, None).await.is_ok());
    }
}
