//! Checkpoint manager for execution context.
//!
//! Wraps `ExecutionRepository` to provide a higher-level API over the
//! checkpoint log. Every successful attempt appends exactly one checkpoint
//! carrying the context entry it produced, so the execution context can
//! always be rebuilt from the log alone.

use chrono::Utc;
use skillchain_types::chain::Link;
use skillchain_types::execution::{Checkpoint, ContextEntry, Execution, ExecutionContext, ExecutionId};
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("repository error: {0}")]
    Repository(String),
}

/// Manages the append-only checkpoint log of executions.
///
/// Generic over `R: ExecutionRepository` so it works with any storage
/// backend (SQLite, in-memory double, etc.). Checkpoints are persisted by
/// the engine inside the same write as the transition that produced them;
/// this type builds them and reads them back.
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: R,
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    /// Create a new checkpoint manager backed by the given repository.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Build the checkpoint for a successful attempt.
    pub fn build(execution_id: ExecutionId, link: &Link, entry: ContextEntry) -> Checkpoint {
        Checkpoint {
            id: Uuid::now_v7(),
            execution_id,
            link_id: link.id.clone(),
            position: link.position,
            attempt_number: entry.attempt_number,
            checkpoint_data: entry,
            created_at: Utc::now(),
        }
    }

    /// All checkpoints of an execution, in success order.
    pub async fn list(&self, execution_id: &ExecutionId) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.repo
            .list_checkpoints(execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Rebuild the execution context from the checkpoint log.
    pub async fn reconstruct_context(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionContext, CheckpointError> {
        let checkpoints = self.list(execution_id).await?;
        let mut context = ExecutionContext::new();
        for checkpoint in checkpoints {
            context.append(checkpoint.checkpoint_data);
        }

        tracing::debug!(
            execution_id = %execution_id,
            entries = context.len(),
            "reconstructed execution context from checkpoints"
        );

        Ok(context)
    }

    /// Distinct link ids that have succeeded at least once, in order of
    /// their first success.
    pub async fn succeeded_links(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<String>, CheckpointError> {
        let mut seen = Vec::new();
        for checkpoint in self.list(execution_id).await? {
            if !seen.contains(&checkpoint.link_id) {
                seen.push(checkpoint.link_id);
            }
        }
        Ok(seen)
    }

    /// Whether the persisted context agrees with the checkpoint log.
    pub async fn verify_context(&self, execution: &Execution) -> Result<bool, CheckpointError> {
        let rebuilt = self.reconstruct_context(&execution.id).await?;
        Ok(rebuilt == execution.execution_context)
    }
}
